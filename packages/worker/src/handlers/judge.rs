//! The worker's side of the broker link.

use std::path::{Path, PathBuf};

use anyhow::Context;
use common::config::find_problem;
use common::retry::Reconnect;
use common::{JsonLines, Problem, Submission, ToWorker, Update, WireError, WorkerReply, archive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::config::WorkerAppConfig;
use crate::error::Result;
use crate::models::EvalSession;
use crate::models::sandbox::SandboxController;

const PROBLEM_DIR: &str = "problem";

/// Serves submissions from one broker with one sandbox, one at a time.
pub struct JudgeWorker<B: SandboxController> {
    sandbox: B,
    session: EvalSession,
    problem_roots: Vec<PathBuf>,
    work_dir: PathBuf,
    broker_addr: String,
    reconnect: Reconnect,
    max_frame: usize,
}

impl<B: SandboxController> JudgeWorker<B> {
    pub fn new(sandbox: B, session: EvalSession, config: &WorkerAppConfig) -> Self {
        Self {
            sandbox,
            session,
            problem_roots: config.worker.problem_roots(),
            work_dir: config.worker.work_dir(),
            broker_addr: config.worker.broker_addr.clone(),
            reconnect: Reconnect::new(
                config.worker.reconnect_base_ms,
                config.worker.reconnect_max_ms,
            ),
            max_frame: config.link.max_frame_bytes,
        }
    }

    pub fn sandbox_mut(&mut self) -> &mut B {
        &mut self.sandbox
    }

    /// Dial the broker and serve it, redialling whenever the link drops.
    pub async fn serve(&mut self) {
        loop {
            let stream = match TcpStream::connect(&self.broker_addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    let delay = self.reconnect.next_delay();
                    warn!(
                        broker = %self.broker_addr,
                        error = %e,
                        attempt = self.reconnect.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Cannot reach broker"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            self.reconnect.reset();
            info!(broker = %self.broker_addr, "Connected to broker");
            let mut link = JsonLines::with_max_frame(stream, self.max_frame);
            match self.serve_connection(&mut link).await {
                Ok(()) => info!("Broker closed the connection"),
                Err(e) => warn!(error = %e, "Broker connection lost"),
            }
        }
    }

    /// Answer jobs on `link` until the broker hangs up.
    pub async fn serve_connection<S>(&mut self, link: &mut JsonLines<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            let submission = match link.recv::<ToWorker>().await {
                Ok(ToWorker::Submission(submission)) => submission,
                Ok(ToWorker::Problem(problem)) => {
                    warn!(problem_id = %problem.id, "Ignoring unrequested problem contents");
                    continue;
                }
                Err(WireError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            if submission.is_liveness() {
                link.send(WorkerReply::Alive.as_str()).await?;
                continue;
            }
            self.handle(link, submission).await?;
        }
    }

    #[instrument(skip_all, fields(problem_id = %submission.problem_id))]
    async fn handle<S>(&mut self, link: &mut JsonLines<S>, submission: Submission) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let problem_dir = match find_problem(&self.problem_roots, &submission.problem_id) {
            Some(dir) => {
                link.send(WorkerReply::Ok.as_str()).await?;
                dir
            }
            None => {
                link.send(WorkerReply::SendProblem.as_str()).await?;
                let problem = match link.recv::<ToWorker>().await? {
                    ToWorker::Problem(problem) => problem,
                    ToWorker::Submission(_) => {
                        let msg = Update::error("Cannot unpack problem", "no problem contents received");
                        link.send(&msg).await?;
                        return Ok(());
                    }
                };
                match unpack_problem(&self.work_dir, problem).await {
                    Ok(dir) => dir,
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "Cannot unpack problem");
                        link.send(&Update::error("Cannot unpack problem", format!("{e:#}")))
                            .await?;
                        return Ok(());
                    }
                }
            }
        };

        info!(problem_dir = %problem_dir.display(), "Evaluating submission");
        let Self { sandbox, session, .. } = self;
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<String>();

        let evaluation = async move {
            session
                .evaluate(sandbox, &problem_dir, &submission.data, |line: &str| {
                    let _ = progress_tx.send(line.to_string());
                })
                .await
        };
        let forward = async {
            while let Some(line) = progress_rx.recv().await {
                link.send(&line).await?;
            }
            Ok::<(), WireError>(())
        };
        let (result, forwarded) = tokio::join!(evaluation, forward);
        forwarded?;

        match result {
            Ok(verdict) => link.send(&Update::verdict(&verdict)).await?,
            Err(e) => {
                warn!(error = %e, "Evaluation failed");
                link.send(&Update::error("Eval error", e)).await?;
            }
        }
        Ok(())
    }
}

/// Replace the worker's scratch problem directory with `problem`'s contents.
async fn unpack_problem(work_dir: &Path, problem: Problem) -> anyhow::Result<PathBuf> {
    let dest = work_dir.join(PROBLEM_DIR);
    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&dest)
            .await
            .with_context(|| format!("cannot remove '{}'", dest.display()))?;
    }
    tokio::fs::create_dir_all(&dest)
        .await
        .with_context(|| format!("cannot create '{}'", dest.display()))?;

    let target = dest.clone();
    tokio::task::spawn_blocking(move || archive::unpack(&problem.targz, &target))
        .await
        .context("unpack task panicked")?
        .with_context(|| format!("cannot unpack into '{}'", dest.display()))?;
    Ok(dest)
}
