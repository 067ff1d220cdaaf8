use anyhow::Context;
use server::Server;
use server::config::ServerAppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServerAppConfig::load().context("Failed to load config")?;
    let server = Server::bind(&config)
        .await
        .context("Failed to bind listeners")?;
    let broker = server.broker();

    tokio::select! {
        _ = server.serve() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("Interrupted, shutting down");
            broker.shutdown();
        }
    }

    Ok(())
}
