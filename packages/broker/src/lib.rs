pub mod broker;
pub mod config;
pub mod error;
pub mod job;
pub mod link;
pub mod problem;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use job::Job;
pub use link::WorkerLink;
pub use problem::{ProblemSource, ProblemStore};
