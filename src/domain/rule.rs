//! A named policy entry: a key projection plus one or more refill bands.

use serde::{Deserialize, Serialize};

use crate::domain::band::RateLimitBand;
use crate::error::FluxGateError;
use crate::key::KeySpec;

/// One rule within a [`crate::domain::ruleset::RateLimitRuleSet`].
///
/// All bands must admit for the rule itself to admit. Bands are expected
/// to be supplied narrowest-window-first so the common-case rejection
/// happens at the first (cheapest) band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub rule_id: String,
    pub name: String,
    pub key_spec: KeySpec,
    pub bands: Vec<RateLimitBand>,
}

impl RateLimitRule {
    pub fn new(
        rule_id: impl Into<String>,
        name: impl Into<String>,
        key_spec: KeySpec,
        bands: Vec<RateLimitBand>,
    ) -> Result<Self, FluxGateError> {
        let rule = Self {
            rule_id: rule_id.into(),
            name: name.into(),
            key_spec,
            bands,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), FluxGateError> {
        if self.rule_id.trim().is_empty() {
            return Err(FluxGateError::InvalidRuleConfig {
                rule_id: self.rule_id.clone(),
                reason: "rule_id must not be empty".to_string(),
            });
        }
        if self.bands.is_empty() {
            return Err(FluxGateError::InvalidRuleConfig {
                rule_id: self.rule_id.clone(),
                reason: "rule must declare at least one band".to_string(),
            });
        }
        for band in &self.bands {
            band.validate().map_err(|_| FluxGateError::InvalidRuleConfig {
                rule_id: self.rule_id.clone(),
                reason: format!("invalid band in rule {}", self.rule_id),
            })?;
        }
        Ok(())
    }
}
