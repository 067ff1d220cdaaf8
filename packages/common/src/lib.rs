pub mod archive;
pub mod config;
pub mod digest;
pub mod protocol;
pub mod retry;
pub mod wire;

pub use digest::Sha1Digest;
pub use protocol::{Problem, Submission, ToWorker, Update, WorkerReply};
pub use wire::{JsonLines, WireError};
