//! Derives a stable [`RateLimitKey`] from a [`RequestContext`] per rule.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::domain::context::RequestContext;
use crate::domain::rule::RateLimitRule;

/// Reserved characters that would otherwise collide with the key's own
/// separators (`:`, `|`, `=`).
const RESERVED: &AsciiSet = &CONTROLS.add(b':').add(b'|').add(b'=');

const MISSING_SENTINEL: &str = "\u{2205}";

/// Single attribute a rule can key on. `Composite` combines several in a
/// fixed, ascending-lexicographic order so the same projection always
/// yields the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    ClientIp,
    UserId,
    ApiKey,
    Endpoint,
    Method,
}

impl KeyStrategy {
    fn selector_name(&self) -> &'static str {
        match self {
            KeyStrategy::ClientIp => "client_ip",
            KeyStrategy::UserId => "user_id",
            KeyStrategy::ApiKey => "api_key",
            KeyStrategy::Endpoint => "endpoint",
            KeyStrategy::Method => "method",
        }
    }
}

/// The set of attributes a rule projects a request onto. Always
/// normalized to ascending order by selector name at construction time so
/// two specs built from the same set of strategies in any order compare
/// equal and resolve to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    strategies: Vec<KeyStrategy>,
}

impl KeySpec {
    pub fn single(strategy: KeyStrategy) -> Self {
        Self {
            strategies: vec![strategy],
        }
    }

    pub fn composite(mut strategies: Vec<KeyStrategy>) -> Self {
        strategies.sort_by_key(|s| s.selector_name());
        strategies.dedup();
        Self { strategies }
    }
}

/// Resolves a [`RequestContext`] + [`RateLimitRule`] pair into the
/// canonical selector string used as part of the bucket key.
///
/// Deterministic and pure: the same (context-projection, rule) pair
/// always yields the same string; a differing projected attribute always
/// yields a different one.
pub struct KeyResolver;

impl KeyResolver {
    pub fn resolve(context: &RequestContext, rule: &RateLimitRule) -> String {
        let mut out = String::new();
        for strategy in &rule.key_spec.strategies {
            let name = strategy.selector_name();
            let value = context.attribute(name);
            out.push_str(name);
            out.push('=');
            match value {
                Some(v) => out.push_str(&utf8_percent_encode(v, RESERVED).to_string()),
                None => out.push_str(MISSING_SENTINEL),
            }
            out.push('|');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_with(spec: KeySpec) -> RateLimitRule {
        use crate::domain::band::RateLimitBand;
        use std::time::Duration;
        RateLimitRule::new(
            "r1",
            "r1",
            spec,
            vec![RateLimitBand::new(None, Duration::from_secs(1), 5).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn resolve_is_deterministic() {
        let ctx = RequestContext::builder().client_ip("1.2.3.4").build();
        let rule = rule_with(KeySpec::single(KeyStrategy::ClientIp));
        let a = KeyResolver::resolve(&ctx, &rule);
        let b = KeyResolver::resolve(&ctx, &rule);
        assert_eq!(a, b);
        assert_eq!(a, "client_ip=1.2.3.4|");
    }

    #[test]
    fn missing_attribute_uses_sentinel() {
        let ctx = RequestContext::builder().build();
        let rule = rule_with(KeySpec::single(KeyStrategy::UserId));
        let key = KeyResolver::resolve(&ctx, &rule);
        assert!(key.contains(MISSING_SENTINEL));
    }

    #[test]
    fn distinct_projections_yield_distinct_keys() {
        let ctx_a = RequestContext::builder().user_id("u1").build();
        let ctx_b = RequestContext::builder().user_id("u2").build();
        let rule = rule_with(KeySpec::single(KeyStrategy::UserId));
        assert_ne!(
            KeyResolver::resolve(&ctx_a, &rule),
            KeyResolver::resolve(&ctx_b, &rule)
        );
    }

    #[test]
    fn composite_key_is_order_independent() {
        let spec_a = KeySpec::composite(vec![KeyStrategy::UserId, KeyStrategy::ClientIp]);
        let spec_b = KeySpec::composite(vec![KeyStrategy::ClientIp, KeyStrategy::UserId]);
        assert_eq!(spec_a, spec_b);
    }

    #[test]
    fn reserved_characters_are_escaped() {
        let ctx = RequestContext::builder().api_key("a:b|c=d").build();
        let rule = rule_with(KeySpec::single(KeyStrategy::ApiKey));
        let key = KeyResolver::resolve(&ctx, &rule);
        assert!(!key.contains("a:b|c=d"));
        assert!(key.starts_with("api_key="));
    }
}
