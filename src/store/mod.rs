//! The store abstraction (C1) and its implementations.

pub mod local;
pub mod redis_store;

use async_trait::async_trait;

use crate::bucket::BucketState;
use crate::domain::band::RateLimitBand;
use crate::error::FluxGateError;

pub use local::LocalTokenBucketStore;
pub use redis_store::RedisTokenBucketStore;

/// Atomic token-bucket operations against a shared backing store.
///
/// Implementations MUST make `try_consume` appear atomic with respect to
/// any other concurrent call on the same `key` — via a server-side
/// script, a CAS loop, or a lock, depending on the backend.
#[async_trait]
pub trait TokenBucketStore: Send + Sync {
    /// Atomically refills then attempts to consume `permits` tokens from
    /// the bucket at `key`, governed by `band`.
    async fn try_consume(
        &self,
        key: &str,
        band: &RateLimitBand,
        permits: u64,
    ) -> Result<BucketState, FluxGateError>;

    /// Deletes every bucket whose key is scoped to `rule_set_id`,
    /// returning the number of keys removed. In a sharded store this MUST
    /// traverse every shard.
    async fn delete_by_rule_set(&self, rule_set_id: &str) -> Result<u64, FluxGateError>;

    /// Deletes every bucket this store holds, across all rule sets.
    async fn delete_all(&self) -> Result<u64, FluxGateError>;

    async fn close(&self) -> Result<(), FluxGateError>;
}
