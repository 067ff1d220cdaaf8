//! Matches client submissions to connected workers.
//!
//! The job queue has capacity 1 and is the only serialization point: whichever
//! worker loop is waiting on it first takes the next job. There is no priority
//! and no FIFO guarantee across workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Submission, ToWorker, Update, WorkerReply};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::job::Job;
use crate::link::WorkerLink;
use crate::problem::ProblemSource;

pub struct Broker {
    config: BrokerConfig,
    problems: Arc<dyn ProblemSource>,
    jobs_tx: mpsc::Sender<Job>,
    jobs_rx: Mutex<mpsc::Receiver<Job>>,
    live: AtomicUsize,
    shutdown: CancellationToken,
}

/// Counts a worker as live for as long as it is held.
struct Registration<'a> {
    live: &'a AtomicUsize,
}

impl<'a> Registration<'a> {
    fn new(live: &'a AtomicUsize) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Broker {
    pub fn new(config: BrokerConfig, problems: Arc<dyn ProblemSource>) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        Self {
            config,
            problems,
            jobs_tx,
            jobs_rx: Mutex::new(jobs_rx),
            live: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Number of worker connections currently registered.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop every worker loop. Their links are closed and they deregister.
    pub fn shutdown(&self) {
        info!(live = self.live_workers(), "Broker shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`Broker::shutdown`] has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Judge a submission on the first available worker.
    ///
    /// Progress messages are passed to `report` as they arrive; the verdict
    /// text is returned once the worker closes the update stream.
    #[instrument(skip(self, submission, report), fields(problem_id = %submission.problem_id))]
    pub async fn submit(
        &self,
        submission: Submission,
        report: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, BrokerError> {
        if self.live_workers() == 0 {
            warn!("Rejecting submission, no workers connected");
            return Err(BrokerError::NoWorkers);
        }
        if submission.is_liveness() {
            return Err(BrokerError::InvalidProblemId(String::new()));
        }

        let (job, ticket) = Job::new(submission);
        let job_id = job.id;
        let taken = ticket.taken;
        let mut updates = ticket.updates;

        let handoff = async {
            self.jobs_tx
                .send(job)
                .await
                .map_err(|_| BrokerError::WorkerTimeout)?;
            taken.await.map_err(|_| BrokerError::WorkerTimeout)
        };
        match timeout(self.config.handoff_timeout, handoff).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%job_id, "Cannot hand off job (no worker responding)");
                return Err(BrokerError::WorkerTimeout);
            }
        }
        info!(%job_id, "Job handed to worker");

        while let Some(msg) = updates.recv().await {
            match Update::classify(&msg) {
                Update::Progress(text) => report(&text),
                Update::Verdict(text) => return Ok(text),
                Update::Error(text) => return Err(BrokerError::Evaluation(text)),
            }
        }
        Err(BrokerError::WorkerLost)
    }

    /// Serve one worker connection until it dies or the broker shuts down.
    ///
    /// A job whose handling fails is logged and dropped, not requeued; the
    /// connection is closed because its protocol state is unknown.
    #[instrument(skip(self, link))]
    pub async fn serve_worker<L: WorkerLink>(&self, peer: &str, mut link: L) {
        let registration = Registration::new(&self.live);
        info!(live = self.live_workers(), "Worker connected");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = self.next_job() => Some(job),
                _ = tokio::time::sleep(self.config.heartbeat_interval) => None,
            };

            match next {
                Some(Some(mut job)) => {
                    if !job.take() {
                        debug!(job_id = %job.id, "Submitter gave up, discarding job");
                        continue;
                    }
                    if let Err(e) = self.handle_job(&mut link, &job).await {
                        warn!(job_id = %job.id, error = %e, "Error handling job, dropping it");
                        job.push(Update::error("Worker failure", &e)).await;
                        break;
                    }
                }
                Some(None) => break,
                None => {
                    if let Err(e) = self.check_alive(&mut link).await {
                        warn!(error = %e, "Worker failed liveness check");
                        break;
                    }
                }
            }
        }

        link.close().await;
        drop(registration);
        info!(live = self.live_workers(), "Worker disconnected");
    }

    async fn next_job(&self) -> Option<Job> {
        self.jobs_rx.lock().await.recv().await
    }

    async fn check_alive<L: WorkerLink>(&self, link: &mut L) -> Result<(), BrokerError> {
        link.send(&ToWorker::Submission(Submission::liveness()))
            .await?;
        match self.first_reply(link).await? {
            WorkerReply::Alive => Ok(()),
            other => Err(BrokerError::Protocol(format!(
                "expected '{}' to liveness check, got '{other}'",
                WorkerReply::Alive
            ))),
        }
    }

    async fn first_reply<L: WorkerLink>(&self, link: &mut L) -> Result<WorkerReply, BrokerError> {
        let reply = timeout(self.config.reply_timeout, link.recv())
            .await
            .map_err(|_| BrokerError::ReplyTimeout(self.config.reply_timeout))??;
        reply
            .parse()
            .map_err(|e: common::protocol::ParseReplyError| BrokerError::Protocol(e.to_string()))
    }

    async fn handle_job<L: WorkerLink>(&self, link: &mut L, job: &Job) -> Result<(), BrokerError> {
        link.send(&ToWorker::Submission(job.submission.clone()))
            .await?;

        match self.first_reply(link).await? {
            WorkerReply::Alive => {
                warn!(job_id = %job.id, "Worker answered a job as a liveness check, job dropped");
                return Ok(());
            }
            WorkerReply::SendProblem => {
                let problem = match self.problems.archive(&job.submission.problem_id).await {
                    Ok(problem) => problem,
                    Err(e) => {
                        // The worker is left waiting for contents, so the link goes too.
                        job.push(Update::error("Cannot send problem", &e)).await;
                        return Err(e);
                    }
                };
                link.send(&ToWorker::Problem(problem)).await?;
            }
            WorkerReply::Ok => {}
        }
        info!(job_id = %job.id, "Submitting");

        let mut listening = true;
        loop {
            let msg = link.recv().await?;
            let last = Update::is_final(&msg);
            // Keep draining after the submitter leaves so the link stays in sync.
            if listening && !job.push(msg).await {
                debug!(job_id = %job.id, "Submitter went away");
                listening = false;
            }
            if last {
                return Ok(());
            }
        }
    }
}
