use common::Submission;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Buffered progress messages per job before the worker side waits on the client.
const UPDATE_BUFFER: usize = 32;

/// A submission in flight, owned by the broker until its update stream closes.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub submission: Submission,
    updates: mpsc::Sender<String>,
    taken: Option<oneshot::Sender<()>>,
}

/// Submitter side of a [`Job`].
#[derive(Debug)]
pub(crate) struct JobTicket {
    pub taken: oneshot::Receiver<()>,
    pub updates: mpsc::Receiver<String>,
}

impl Job {
    pub(crate) fn new(submission: Submission) -> (Self, JobTicket) {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let (taken_tx, taken_rx) = oneshot::channel();
        let job = Self {
            id: Uuid::new_v4(),
            submission,
            updates: updates_tx,
            taken: Some(taken_tx),
        };
        let ticket = JobTicket {
            taken: taken_rx,
            updates: updates_rx,
        };
        (job, ticket)
    }

    /// Claim the job for a worker. Returns `false` when the submitter already
    /// gave up waiting for the hand-off, in which case the job must not run.
    pub(crate) fn take(&mut self) -> bool {
        match self.taken.take() {
            Some(taken) => taken.send(()).is_ok(),
            None => true,
        }
    }

    /// Append a message to the update stream. Returns `false` once the
    /// submitter stopped listening.
    pub(crate) async fn push(&self, msg: String) -> bool {
        self.updates.send(msg).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_take_after_submitter_gave_up() {
        let (mut job, ticket) = Job::new(Submission::new("p", b"x".to_vec()));
        drop(ticket);
        assert!(!job.take());
    }

    #[tokio::test]
    async fn test_take_and_push() {
        let (mut job, mut ticket) = Job::new(Submission::new("p", b"x".to_vec()));
        assert!(job.take());
        assert!(ticket.taken.await.is_ok());

        assert!(job.push("Compiling".into()).await);
        drop(job);
        assert_eq!(ticket.updates.recv().await.as_deref(), Some("Compiling"));
        assert_eq!(ticket.updates.recv().await, None);
    }
}
