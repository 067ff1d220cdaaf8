use thiserror::Error;

use crate::models::JudgeError;
use crate::models::sandbox::SandboxError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Judge error: {0}")]
    Judge(#[from] JudgeError),

    #[error("Broker link error: {0}")]
    Link(#[from] common::WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
