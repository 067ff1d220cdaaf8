use thiserror::Error;

use super::Mode;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Cannot launch VM: {0}")]
    Launch(String),

    #[error("Lost sync waiting for {expected:?}: {reason}")]
    ProtocolDesync {
        expected: String,
        reason: String,
        /// Output accumulated before the wait failed.
        partial: String,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("VM is not running")]
    NotRunning,

    #[error("Command issued in {actual:?} mode, expected {expected:?}")]
    WrongMode { expected: Mode, actual: Mode },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
