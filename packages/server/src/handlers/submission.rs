use broker::BrokerError;
use common::protocol::ERROR_PREFIX;
use common::{JsonLines, Submission, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::state::AppState;

pub async fn accept_clients(state: AppState, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = state.broker.closed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    let conn = JsonLines::with_max_frame(stream, state.max_frame_bytes);
                    if let Err(e) = handle_client(&state, conn).await {
                        warn!(%peer, error = %e, "Client connection failed");
                    }
                });
            }
            Err(e) => error!(error = %e, "Cannot accept client connection"),
        }
    }
    info!("Stopped accepting submissions");
}

/// What the client sees when judging fails. Worker errors already carry the prefix.
pub fn client_error(err: &BrokerError) -> String {
    match err {
        BrokerError::Evaluation(text) => text.clone(),
        other => format!("{ERROR_PREFIX}: {other}"),
    }
}

/// One submission per connection: read it, stream progress, finish with the
/// verdict or an error string.
#[instrument(skip_all)]
pub async fn handle_client<S>(state: &AppState, mut conn: JsonLines<S>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let submission: Submission = conn.recv().await?;
    info!(
        problem_id = %submission.problem_id,
        bytes = submission.data.len(),
        "Received submission"
    );

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<String>();
    let judge = async {
        let mut report = move |line: &str| {
            let _ = progress_tx.send(line.to_string());
        };
        state.broker.submit(submission, &mut report).await
    };
    let forward = async {
        while let Some(line) = progress_rx.recv().await {
            conn.send(&line).await?;
        }
        Ok::<_, WireError>(())
    };
    let (result, forwarded) = tokio::join!(judge, forward);
    forwarded?;

    let last = match result {
        Ok(verdict) => {
            info!("Verdict delivered");
            verdict
        }
        Err(e) => {
            warn!(error = %e, "Submission failed");
            client_error(&e)
        }
    };
    conn.send(&last).await?;
    conn.close().await
}
