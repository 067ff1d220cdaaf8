pub mod cache;
pub mod error;
pub mod judge;
pub mod media;
pub mod sandbox;
pub mod verdict;

pub use cache::{JudgeCache, Language};
pub use error::JudgeError;
pub use judge::EvalSession;
pub use media::{IsoImager, MediaImager};
pub use verdict::VerdictParser;
