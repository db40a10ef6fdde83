//! Orchestrates rule evaluation across bands and rules for a single
//! request (C5).

use std::sync::Arc;

use crate::config::StoreUnavailablePolicy;
use crate::domain::context::RequestContext;
use crate::domain::ruleset::RateLimitRuleSet;
use crate::error::FluxGateError;
use crate::key::KeyResolver;
use crate::metrics::MetricsRecorder;
use crate::store::TokenBucketStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_tokens: u64,
    pub nanos_to_wait_for_refill: u64,
}

impl RateLimitResult {
    fn admit(remaining_tokens: u64) -> Self {
        Self {
            allowed: true,
            remaining_tokens,
            nanos_to_wait_for_refill: 0,
        }
    }

    fn reject(remaining_tokens: u64, nanos_to_wait_for_refill: u64) -> Self {
        Self {
            allowed: false,
            remaining_tokens,
            nanos_to_wait_for_refill,
        }
    }
}

/// A [`RateLimitResult`] plus the rule that produced it, when rejected.
#[derive(Debug, Clone)]
pub struct RateLimitVerdict {
    pub result: RateLimitResult,
    pub matched_rule_id: Option<String>,
}

impl RateLimitVerdict {
    /// The fail-open verdict for a rule set id with no registered rules.
    pub fn admitted_unknown_rule_set() -> Self {
        Self {
            result: RateLimitResult::admit(0),
            matched_rule_id: None,
        }
    }
}

/// The evaluation engine: given a rule set and a request context,
/// produces a single verdict.
///
/// Evaluation order: rules in declared order, all must admit; within a
/// rule, bands in declared order, all must admit. Rejection short-
/// circuits at the first rejecting band/rule. Bands of the same rule
/// that admitted before a later band rejects are NOT rolled back — the
/// next attempt simply finds them partially refilled again. This is
/// accepted drift, not a bug: see `DESIGN.md`.
pub struct RateLimiter {
    store: Arc<dyn TokenBucketStore>,
    metrics: Arc<dyn MetricsRecorder>,
    on_store_unavailable: StoreUnavailablePolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TokenBucketStore>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self::with_policy(store, metrics, StoreUnavailablePolicy::FailOpen)
    }

    pub fn with_policy(
        store: Arc<dyn TokenBucketStore>,
        metrics: Arc<dyn MetricsRecorder>,
        on_store_unavailable: StoreUnavailablePolicy,
    ) -> Self {
        Self {
            store,
            metrics,
            on_store_unavailable,
        }
    }

    /// Evaluates a rule set against `context`. A missing rule set (absent
    /// from the provider) fails open: the request is admitted and a
    /// warning is logged, per the external-interface contract — it is not
    /// surfaced as an error to the caller.
    pub async fn try_consume(
        &self,
        context: &RequestContext,
        rule_set: &RateLimitRuleSet,
        permits: u64,
    ) -> Result<RateLimitVerdict, FluxGateError> {
        let span = tracing::info_span!("try_consume", rule_set_id = %rule_set.rule_set_id);
        let _enter = span.enter();

        let mut min_remaining = u64::MAX;

        for rule in &rule_set.rules {
            let selector = KeyResolver::resolve(context, rule);

            for (band_index, band) in rule.bands.iter().enumerate() {
                let key = format!("{}:{}:{}:{}", rule_set.rule_set_id, rule.rule_id, band_index, selector);
                let state = match self.store.try_consume(&key, band, permits).await {
                    Ok(state) => state,
                    Err(err @ FluxGateError::StoreUnavailable { .. }) => match self.on_store_unavailable {
                        StoreUnavailablePolicy::FailOpen => {
                            tracing::warn!(rule_id = %rule.rule_id, band_index, error = %err, "store unavailable, admitting (fail-open)");
                            continue;
                        }
                        StoreUnavailablePolicy::FailClosed => return Err(err),
                    },
                    Err(err) => return Err(err),
                };

                if !state.consumed {
                    self.metrics.record(&rule_set.rule_set_id, false).await;
                    tracing::debug!(rule_id = %rule.rule_id, band_index, "rejected");
                    return Ok(RateLimitVerdict {
                        result: RateLimitResult::reject(
                            state.remaining_tokens,
                            state.nanos_to_wait_for_refill,
                        ),
                        matched_rule_id: Some(rule.rule_id.clone()),
                    });
                }

                min_remaining = min_remaining.min(state.remaining_tokens);
            }
        }

        self.metrics.record(&rule_set.rule_set_id, true).await;
        Ok(RateLimitVerdict {
            result: RateLimitResult::admit(if min_remaining == u64::MAX { 0 } else { min_remaining }),
            matched_rule_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::band::RateLimitBand;
    use crate::domain::rule::RateLimitRule;
    use crate::key::{KeySpec, KeyStrategy};
    use crate::metrics::NoopMetricsRecorder;
    use crate::store::LocalTokenBucketStore;
    use std::time::Duration;

    fn rule_set(id: &str, rules: Vec<RateLimitRule>) -> RateLimitRuleSet {
        RateLimitRuleSet::new(id, rules).unwrap()
    }

    fn single_band_rule(id: &str, strategy: KeyStrategy, capacity: u64) -> RateLimitRule {
        RateLimitRule::new(
            id,
            id,
            KeySpec::single(strategy),
            vec![RateLimitBand::new(None, Duration::from_secs(1), capacity).unwrap()],
        )
        .unwrap()
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            Arc::new(LocalTokenBucketStore::new()),
            Arc::new(NoopMetricsRecorder),
        )
    }

    // Scenario 1 & part of 2 from SPEC_FULL.md §8.
    #[tokio::test]
    async fn admits_until_capacity_then_rejects() {
        let limiter = limiter();
        let set = rule_set("rs", vec![single_band_rule("r1", KeyStrategy::ClientIp, 5)]);
        let ctx = RequestContext::builder().client_ip("1.1.1.1").build();

        for expected_remaining in (0..5).rev() {
            let verdict = limiter.try_consume(&ctx, &set, 1).await.unwrap();
            assert!(verdict.result.allowed);
            assert_eq!(verdict.result.remaining_tokens, expected_remaining);
        }

        let verdict = limiter.try_consume(&ctx, &set, 1).await.unwrap();
        assert!(!verdict.result.allowed);
        assert_eq!(verdict.matched_rule_id.as_deref(), Some("r1"));
    }

    // Scenario 3: multi-band rule rejects at the first (narrowest) band.
    #[tokio::test]
    async fn multi_band_rejects_at_first_exhausted_band() {
        let limiter = limiter();
        let rule = RateLimitRule::new(
            "r1",
            "r1",
            KeySpec::single(KeyStrategy::ClientIp),
            vec![
                RateLimitBand::new(Some("burst".into()), Duration::from_secs(1), 10).unwrap(),
                RateLimitBand::new(Some("sustained".into()), Duration::from_secs(60), 100).unwrap(),
            ],
        )
        .unwrap();
        let set = rule_set("rs", vec![rule]);
        let ctx = RequestContext::builder().client_ip("1.1.1.1").build();

        let mut allowed = 0;
        let mut rejected = 0;
        for _ in 0..11 {
            let verdict = limiter.try_consume(&ctx, &set, 1).await.unwrap();
            if verdict.result.allowed {
                allowed += 1;
            } else {
                rejected += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(rejected, 1);
    }

    // Scenario 4: two independent rules, both must admit.
    #[tokio::test]
    async fn all_rules_must_admit() {
        let limiter = limiter();
        let set = rule_set(
            "rs",
            vec![
                single_band_rule("by-ip", KeyStrategy::ClientIp, 5),
                single_band_rule("by-key", KeyStrategy::ApiKey, 3),
            ],
        );
        let ctx = RequestContext::builder()
            .client_ip("A")
            .api_key("K")
            .build();

        let mut allowed = 0;
        let mut rejected_rule = None;
        for _ in 0..4 {
            let verdict = limiter.try_consume(&ctx, &set, 1).await.unwrap();
            if verdict.result.allowed {
                allowed += 1;
            } else {
                rejected_rule = verdict.matched_rule_id;
            }
        }
        assert_eq!(allowed, 3);
        assert_eq!(rejected_rule.as_deref(), Some("by-key"));
    }

    #[tokio::test]
    async fn different_contexts_get_independent_buckets() {
        let limiter = limiter();
        let set = rule_set("rs", vec![single_band_rule("r1", KeyStrategy::ClientIp, 1)]);
        let ctx_a = RequestContext::builder().client_ip("A").build();
        let ctx_b = RequestContext::builder().client_ip("B").build();

        assert!(limiter.try_consume(&ctx_a, &set, 1).await.unwrap().result.allowed);
        assert!(limiter.try_consume(&ctx_b, &set, 1).await.unwrap().result.allowed);
    }

    struct AlwaysUnavailableStore;

    #[async_trait::async_trait]
    impl TokenBucketStore for AlwaysUnavailableStore {
        async fn try_consume(
            &self,
            _key: &str,
            _band: &RateLimitBand,
            _permits: u64,
        ) -> Result<crate::bucket::BucketState, FluxGateError> {
            Err(FluxGateError::StoreUnavailable {
                message: "simulated outage".into(),
            })
        }

        async fn delete_by_rule_set(&self, _rule_set_id: &str) -> Result<u64, FluxGateError> {
            Ok(0)
        }

        async fn delete_all(&self) -> Result<u64, FluxGateError> {
            Ok(0)
        }

        async fn close(&self) -> Result<(), FluxGateError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fail_open_admits_when_store_unavailable() {
        let limiter = RateLimiter::with_policy(
            Arc::new(AlwaysUnavailableStore),
            Arc::new(NoopMetricsRecorder),
            crate::config::StoreUnavailablePolicy::FailOpen,
        );
        let set = rule_set("rs", vec![single_band_rule("r1", KeyStrategy::ClientIp, 1)]);
        let ctx = RequestContext::builder().client_ip("1.1.1.1").build();

        let verdict = limiter.try_consume(&ctx, &set, 1).await.unwrap();
        assert!(verdict.result.allowed);
    }

    #[tokio::test]
    async fn fail_closed_propagates_store_error() {
        let limiter = RateLimiter::with_policy(
            Arc::new(AlwaysUnavailableStore),
            Arc::new(NoopMetricsRecorder),
            crate::config::StoreUnavailablePolicy::FailClosed,
        );
        let set = rule_set("rs", vec![single_band_rule("r1", KeyStrategy::ClientIp, 1)]);
        let ctx = RequestContext::builder().client_ip("1.1.1.1").build();

        let result = limiter.try_consume(&ctx, &set, 1).await;
        assert!(matches!(result, Err(FluxGateError::StoreUnavailable { .. })));
    }
}
