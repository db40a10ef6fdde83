//! In-process token bucket store.
//!
//! Satisfies the exact same atomicity contract as the Redis-backed store
//! (via a mutex rather than a server-side script) so the rest of the
//! crate can be exercised in tests without a live Redis instance.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::bucket::{self, BucketRecord, BucketState};
use crate::domain::band::RateLimitBand;
use crate::error::FluxGateError;
use crate::store::TokenBucketStore;

/// A stored record plus the absolute micros timestamp it should be swept
/// at if untouched (mirrors the Redis backend's per-key `EXPIRE`).
type Entry = (BucketRecord, u64);

#[derive(Default)]
pub struct LocalTokenBucketStore {
    buckets: Mutex<HashMap<String, Entry>>,
}

impl LocalTokenBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_micros() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }

    /// Removes buckets past their TTL, returning the count swept. Idle
    /// buckets otherwise live in the map forever, unlike the Redis backend
    /// where `EXPIRE` reclaims them for free. Intended to be called
    /// periodically from a background task, not on the request path.
    pub async fn sweep_expired(&self) -> usize {
        let now = Self::now_micros();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, (_, expires_at)| *expires_at > now);
        before - buckets.len()
    }
}

#[async_trait]
impl TokenBucketStore for LocalTokenBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        band: &RateLimitBand,
        permits: u64,
    ) -> Result<BucketState, FluxGateError> {
        let mut buckets = self.buckets.lock().await;
        let existing = buckets.get(key).map(|(record, _)| *record);
        let now = Self::now_micros();
        let (record, state) = bucket::try_consume(existing, band, permits, now);
        let expires_at = now + band.ttl().as_micros() as u64;
        buckets.insert(key.to_string(), (record, expires_at));
        Ok(state)
    }

    async fn delete_by_rule_set(&self, rule_set_id: &str) -> Result<u64, FluxGateError> {
        let prefix = format!("{}:", rule_set_id);
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|k, _| !k.starts_with(&prefix));
        Ok((before - buckets.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64, FluxGateError> {
        let mut buckets = self.buckets.lock().await;
        let count = buckets.len() as u64;
        buckets.clear();
        Ok(count)
    }

    async fn close(&self) -> Result<(), FluxGateError> {
        Ok(())
    }
}
