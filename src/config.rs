//! Layered configuration loading: file + `FLUXGATE_`-prefixed environment
//! variables, falling back to sane defaults when neither is present.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FluxGateError;

/// Policy applied when the store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreUnavailablePolicy {
    /// Admit the request. Default: a rate limiter should not amplify an
    /// outage by itself rejecting everything.
    FailOpen,
    /// Reject the request.
    FailClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// A single `redis://host:port` URI activates standalone mode; a
    /// comma-separated list activates cluster mode.
    pub store_url: String,
    pub bind_address: String,
    #[serde(default = "Config::default_policy")]
    pub on_store_unavailable: StoreUnavailablePolicy,
    #[serde(with = "humantime_serde", default = "Config::default_store_timeout")]
    pub store_timeout: Duration,
    #[serde(with = "humantime_serde", default = "Config::default_poll_interval")]
    pub poll_interval: Duration,
    /// Path to a YAML rule repository file. When absent, rules are kept
    /// purely in memory (set programmatically or via the reload protocol).
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl Config {
    fn default_policy() -> StoreUnavailablePolicy {
        StoreUnavailablePolicy::FailOpen
    }

    fn default_store_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }

    pub fn is_cluster(&self) -> bool {
        self.store_url.contains(',')
    }

    pub fn store_nodes(&self) -> Vec<String> {
        self.store_url.split(',').map(|s| s.trim().to_string()).collect()
    }

    pub fn load(path: &str) -> Result<Self, FluxGateError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FLUXGATE"))
            .build()
            .map_err(|e| FluxGateError::ConfigurationError {
                message: e.to_string(),
            })?;

        match settings.try_deserialize::<Config>() {
            Ok(config) => Ok(config),
            Err(_) => {
                tracing::warn!("failed to load config from {}, using defaults", path);
                Ok(Config::default())
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: "redis://127.0.0.1:6379".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            on_store_unavailable: Self::default_policy(),
            store_timeout: Self::default_store_timeout(),
            poll_interval: Self::default_poll_interval(),
            rules_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_standalone() {
        let cfg = Config::default();
        assert!(!cfg.is_cluster());
        assert_eq!(cfg.store_nodes(), vec!["redis://127.0.0.1:6379"]);
    }

    #[test]
    fn comma_separated_url_is_cluster() {
        let mut cfg = Config::default();
        cfg.store_url = "redis://a:6379,redis://b:6379".to_string();
        assert!(cfg.is_cluster());
        assert_eq!(cfg.store_nodes().len(), 2);
    }

    #[test]
    fn load_falls_back_to_defaults_when_missing() {
        let cfg = Config::load("/nonexistent/path/does/not/exist").unwrap();
        assert_eq!(cfg.bind_address, Config::default().bind_address);
    }
}
