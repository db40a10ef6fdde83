//! A single refill policy within a rule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FluxGateError;

/// One refill window: `capacity` tokens are available per `window`,
/// refilled continuously rather than in discrete steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBand {
    /// Human-readable label, e.g. "burst" or "sustained".
    #[serde(default)]
    pub label: Option<String>,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub capacity: u64,
}

impl RateLimitBand {
    pub fn new(label: Option<String>, window: Duration, capacity: u64) -> Result<Self, FluxGateError> {
        let band = Self {
            label,
            window,
            capacity,
        };
        band.validate()?;
        Ok(band)
    }

    pub fn validate(&self) -> Result<(), FluxGateError> {
        if self.capacity == 0 {
            return Err(FluxGateError::InvalidRuleConfig {
                rule_id: self.label.clone().unwrap_or_default(),
                reason: "band capacity must be at least 1".to_string(),
            });
        }
        if self.window.is_zero() {
            return Err(FluxGateError::InvalidRuleConfig {
                rule_id: self.label.clone().unwrap_or_default(),
                reason: "band window must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Refill rate in tokens per nanosecond, as a fraction.
    pub fn rate_per_nanos(&self) -> (u128, u128) {
        (self.capacity as u128, self.window.as_nanos().max(1))
    }

    /// Bucket TTL: twice the window, per the wire protocol.
    pub fn ttl(&self) -> Duration {
        self.window * 2
    }
}
