//! An immutable, named bundle of rules evaluated together.

use std::collections::HashSet;

use crate::domain::rule::RateLimitRule;
use crate::error::FluxGateError;

/// A loaded, validated rule set. Replaced wholesale on reload; never
/// mutated in place once constructed.
#[derive(Debug, Clone)]
pub struct RateLimitRuleSet {
    pub rule_set_id: String,
    pub rules: Vec<RateLimitRule>,
}

impl RateLimitRuleSet {
    pub fn new(rule_set_id: impl Into<String>, rules: Vec<RateLimitRule>) -> Result<Self, FluxGateError> {
        let rule_set_id = rule_set_id.into();
        let set = Self { rule_set_id, rules };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), FluxGateError> {
        if self.rules.is_empty() {
            return Err(FluxGateError::InvalidRuleConfig {
                rule_id: self.rule_set_id.clone(),
                reason: "rule set must contain at least one rule".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.rule_id.as_str()) {
                return Err(FluxGateError::InvalidRuleConfig {
                    rule_id: rule.rule_id.clone(),
                    reason: format!("duplicate rule_id within rule set {}", self.rule_set_id),
                });
            }
        }
        Ok(())
    }
}
