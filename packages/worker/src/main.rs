use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use worker::config::WorkerAppConfig;
use worker::handlers::judge::JudgeWorker;
use worker::models::sandbox::{Marker, QemuController};
use worker::models::{EvalSession, JudgeCache};

#[derive(Parser, Debug)]
#[command(version, about = "Garzon judging worker")]
struct Cli {
    /// Disk image under the VM root, overriding `vm.image`.
    #[arg(long)]
    image: Option<String>,

    /// Boot the image cold, save the clean snapshot and exit.
    #[arg(long)]
    prepare: bool,

    /// Configuration file (without extension).
    #[arg(long, env = "GARZON_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    let mut config = WorkerAppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(image) = cli.image {
        config.vm.image = image;
    }

    let work_dir = config.worker.work_dir();
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work dir '{}'", work_dir.display()))?;

    let mut vm = QemuController::new(
        config.vm.clone(),
        &config.transfer,
        &work_dir,
        Marker::process().clone(),
    );

    if cli.prepare {
        info!(image = %config.vm.image, "Preparing snapshot");
        vm.boot().await.context("Failed to boot VM")?;
        let saved = vm.save().await.context("Failed to save snapshot");
        vm.quit().await.context("Failed to stop VM")?;
        saved?;
        info!(snapshot = %config.vm.snapshot, "Snapshot saved");
        return Ok(());
    }

    vm.resume()
        .await
        .context("Failed to resume VM from snapshot (run with --prepare first?)")?;
    info!(image = %config.vm.image, broker = %config.worker.broker_addr, "Worker starting");

    let cache = JudgeCache::new(config.worker.cache_dir())
        .await
        .context("Failed to open judge cache")?;
    let session = EvalSession::with_media(&work_dir, cache, &config.media);
    let mut worker = JudgeWorker::new(vm, session, &config);

    tokio::select! {
        _ = worker.serve() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!("Shutting down");
        }
    }

    if let Err(e) = worker.sandbox_mut().quit().await {
        warn!(error = %e, "VM did not stop cleanly");
    }
    Ok(())
}
