//! Rate-limit decision metrics, modeled as a nullable collaborator: a
//! no-op sink by default rather than an `Option<MetricsRecorder>` threaded
//! through every call site.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct RuleSetMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub throttled_requests: u64,
}

#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record(&self, rule_set_id: &str, allowed: bool);
    async fn snapshot(&self, rule_set_id: &str) -> RuleSetMetrics;
}

/// The default collaborator: does nothing, at zero cost per call.
pub struct NoopMetricsRecorder;

#[async_trait]
impl MetricsRecorder for NoopMetricsRecorder {
    async fn record(&self, _rule_set_id: &str, _allowed: bool) {}

    async fn snapshot(&self, _rule_set_id: &str) -> RuleSetMetrics {
        RuleSetMetrics::default()
    }
}

/// An in-process recorder for embedding or tests that want to assert on
/// counters without standing up an external metrics backend.
#[derive(Default)]
pub struct InMemoryMetricsRecorder {
    by_rule_set: RwLock<HashMap<String, RuleSetMetrics>>,
}

impl InMemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsRecorder for InMemoryMetricsRecorder {
    async fn record(&self, rule_set_id: &str, allowed: bool) {
        let mut guard = self.by_rule_set.write().await;
        let entry = guard.entry(rule_set_id.to_string()).or_default();
        entry.total_requests += 1;
        if allowed {
            entry.allowed_requests += 1;
        } else {
            entry.throttled_requests += 1;
        }
    }

    async fn snapshot(&self, rule_set_id: &str) -> RuleSetMetrics {
        self.by_rule_set
            .read()
            .await
            .get(rule_set_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_recorder_counts_allowed_and_throttled() {
        let recorder = InMemoryMetricsRecorder::new();
        recorder.record("rs", true).await;
        recorder.record("rs", false).await;
        recorder.record("rs", true).await;

        let snap = recorder.snapshot("rs").await;
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.allowed_requests, 2);
        assert_eq!(snap.throttled_requests, 1);
    }

    #[tokio::test]
    async fn noop_recorder_never_panics() {
        let recorder = NoopMetricsRecorder;
        recorder.record("rs", true).await;
        assert_eq!(recorder.snapshot("rs").await.total_requests, 0);
    }
}
