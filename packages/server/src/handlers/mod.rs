pub mod submission;
pub mod worker;
