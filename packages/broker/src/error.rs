use std::time::Duration;

use common::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no workers available")]
    NoWorkers,

    #[error("no worker responding")]
    WorkerTimeout,

    #[error("worker connection lost before a verdict was produced")]
    WorkerLost,

    /// Error update relayed verbatim from the worker.
    #[error("{0}")]
    Evaluation(String),

    #[error("problem '{0}' not found")]
    ProblemNotFound(String),

    #[error("invalid problem id '{0}'")]
    InvalidProblemId(String),

    #[error("cannot package problem '{id}': {source}")]
    Archive {
        id: String,
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker did not answer within {0:?}")]
    ReplyTimeout(Duration),

    #[error("worker link error: {0}")]
    Link(#[from] WireError),
}
