use common::JsonLines;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::state::AppState;

/// Hand every worker connection to the broker on its own task.
pub async fn accept_workers(state: AppState, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = state.broker.closed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let broker = state.broker.clone();
                let link = JsonLines::with_max_frame(stream, state.max_frame_bytes);
                tokio::spawn(async move {
                    broker.serve_worker(&peer.to_string(), link).await;
                });
            }
            Err(e) => error!(error = %e, "Cannot accept worker connection"),
        }
    }
    info!("Stopped accepting workers");
}
