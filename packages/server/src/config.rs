use std::path::PathBuf;
use std::time::Duration;

use broker::BrokerConfig;
use common::config::{ENV_PREFIX, LinkConfig, config_path, split_search_path};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    /// Address workers connect to. Default: "0.0.0.0:6060".
    #[serde(default = "default_worker_addr")]
    pub worker_addr: String,
    /// Address clients submit to. Default: "0.0.0.0:7070".
    #[serde(default = "default_submit_addr")]
    pub submit_addr: String,
}

fn default_worker_addr() -> String {
    "0.0.0.0:6060".into()
}
fn default_submit_addr() -> String {
    "0.0.0.0:7070".into()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            worker_addr: default_worker_addr(),
            submit_addr: default_submit_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Seconds a submission waits for a worker to take it. Default: 5.
    #[serde(default = "default_handoff_timeout_secs")]
    pub handoff_timeout_secs: u64,
    /// Idle seconds before a worker gets a liveness check. Default: 10.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds a worker has to answer a job or liveness check. Default: 10.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

fn default_handoff_timeout_secs() -> u64 {
    5
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_reply_timeout_secs() -> u64 {
    10
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            handoff_timeout_secs: default_handoff_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            handoff_timeout: Duration::from_secs(settings.handoff_timeout_secs),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            reply_timeout: Duration::from_secs(settings.reply_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProblemsConfig {
    /// OS path list of problem roots. Falls back to `GARZON_PATH`, then ".".
    #[serde(default)]
    pub path: Option<String>,
}

/// Broker host configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerAppConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub problems: ProblemsConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

impl ServerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.worker_addr", default_worker_addr())?
            .set_default("server.submit_addr", default_submit_addr())?
            .add_source(File::with_name(&config_path("config/server")).required(false))
            // e.g. GARZON__SERVER__SUBMIT_ADDR
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn problem_roots(&self) -> Vec<PathBuf> {
        let env_path = std::env::var("GARZON_PATH").ok();
        split_search_path(self.problems.path.as_deref().or(env_path.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerAppConfig::default();
        assert_eq!(config.server.worker_addr, "0.0.0.0:6060");
        let broker: BrokerConfig = (&config.broker).into();
        assert_eq!(broker.handoff_timeout, Duration::from_secs(5));
        assert_eq!(broker.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_explicit_problem_path_wins() {
        let config = ServerAppConfig {
            problems: ProblemsConfig {
                path: Some("/srv/problems".into()),
            },
            ..Default::default()
        };
        assert_eq!(config.problem_roots(), vec![PathBuf::from("/srv/problems")]);
    }
}
