//! Listens for rule-reload events and purges the buckets they invalidate.

use async_trait::async_trait;
use std::sync::Arc;

use crate::provider::RuleSetProvider;
use crate::reload::{ReloadListener, RuleReloadEvent};
use crate::store::TokenBucketStore;

/// On a full reload, every bucket is purged. On a scoped reload, only the
/// buckets under that rule set are purged. Deletion is best-effort: a
/// failure is logged and the next event tries again.
pub struct BucketResetHandler {
    store: Arc<dyn TokenBucketStore>,
    provider: Arc<RuleSetProvider>,
}

impl BucketResetHandler {
    pub fn new(store: Arc<dyn TokenBucketStore>, provider: Arc<RuleSetProvider>) -> Self {
        Self { store, provider }
    }
}

#[async_trait]
impl ReloadListener for BucketResetHandler {
    async fn on_reload(&self, event: RuleReloadEvent) {
        self.provider.invalidate(event.rule_set_id.as_deref()).await;

        let result = if event.full_reload {
            self.store.delete_all().await
        } else if let Some(rule_set_id) = &event.rule_set_id {
            self.store.delete_by_rule_set(rule_set_id).await
        } else {
            return;
        };

        match result {
            Ok(count) => tracing::info!(
                rule_set_id = event.rule_set_id.as_deref().unwrap_or("*"),
                buckets_removed = count,
                "reset buckets after rule reload"
            ),
            Err(err) => tracing::warn!(
                rule_set_id = event.rule_set_id.as_deref().unwrap_or("*"),
                error = %err,
                "failed to reset buckets after rule reload, will retry on next event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::band::RateLimitBand;
    use crate::provider::MemoryRuleRepository;
    use crate::store::LocalTokenBucketStore;
    use std::time::Duration;

    #[tokio::test]
    async fn full_reload_deletes_every_bucket() {
        let store: Arc<dyn TokenBucketStore> = Arc::new(LocalTokenBucketStore::new());
        let provider = Arc::new(RuleSetProvider::new(Box::new(MemoryRuleRepository::new())));
        let band = RateLimitBand::new(None, Duration::from_secs(1), 5).unwrap();
        store.try_consume("rs:r1:0:k", &band, 1).await.unwrap();

        let handler = BucketResetHandler::new(Arc::clone(&store), provider);
        handler.on_reload(RuleReloadEvent::full(0)).await;

        let state = store.try_consume("rs:r1:0:k", &band, 5).await.unwrap();
        assert!(state.consumed, "bucket should have reseeded to full capacity");
    }

    #[tokio::test]
    async fn scoped_reload_only_touches_its_rule_set() {
        let store: Arc<dyn TokenBucketStore> = Arc::new(LocalTokenBucketStore::new());
        let provider = Arc::new(RuleSetProvider::new(Box::new(MemoryRuleRepository::new())));
        let band = RateLimitBand::new(None, Duration::from_secs(1), 5).unwrap();
        store.try_consume("a:r1:0:k", &band, 5).await.unwrap();
        store.try_consume("b:r1:0:k", &band, 5).await.unwrap();

        let handler = BucketResetHandler::new(Arc::clone(&store), provider);
        handler
            .on_reload(RuleReloadEvent::for_rule_set("a", 0))
            .await;

        assert!(store.try_consume("a:r1:0:k", &band, 5).await.unwrap().consumed);
        assert!(!store.try_consume("b:r1:0:k", &band, 1).await.unwrap().consumed);
    }
}
