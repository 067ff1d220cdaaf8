use std::time::Duration;

/// Timing knobs of a [`crate::Broker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long a submission may wait for a worker to take it.
    pub handoff_timeout: Duration,
    /// Idle time after which a worker gets a liveness check.
    pub heartbeat_interval: Duration,
    /// How long a worker has to give its first reply to a job or liveness check.
    pub reply_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            handoff_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(10),
        }
    }
}
