//! Redis-backed [`TokenBucketStore`], standalone and cluster.
//!
//! Atomicity is achieved with a server-side Lua script, loaded once and
//! invoked by SHA; on `NOSCRIPT` the script is reloaded and the call is
//! retried exactly once. Bucket keys carry the `{ruleSetId}` hash tag so
//! every key belonging to one rule set lands on the same cluster slot.
//!
//! Cross-shard deletion (`delete_by_rule_set`/`delete_all`) discovers the
//! live master list via `CLUSTER NODES` rather than trusting the seed
//! nodes the store was constructed with, since seeds are commonly a
//! subset of the cluster and may include replicas that reject `UNLINK`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::AsyncCommands;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bucket::BucketState;
use crate::domain::band::RateLimitBand;
use crate::error::FluxGateError;
use crate::store::TokenBucketStore;

const CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local window_micros = tonumber(ARGV[2])
local permits = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl_secs = tonumber(ARGV[5])

local existing = redis.call('HMGET', key, 't', 'lr')
local tokens = tonumber(existing[1])
local last_refill = tonumber(existing[2])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed = now - last_refill
if elapsed > 0 then
    local refilled = math.floor(elapsed * capacity / window_micros)
    if refilled > 0 then
        tokens = math.min(capacity, tokens + refilled)
        last_refill = last_refill + math.floor(refilled * window_micros / capacity)
    end
end

local consumed = 0
local wait_nanos = 0
if tokens >= permits then
    tokens = tokens - permits
    consumed = 1
else
    local deficit = permits - tokens
    local wait_micros = math.ceil(deficit * window_micros / capacity)
    wait_nanos = wait_micros * 1000
end

redis.call('HMSET', key, 't', tokens, 'lr', last_refill)
redis.call('EXPIRE', key, ttl_secs)

return {consumed, tokens, wait_nanos}
"#;

enum Connection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

pub struct RedisTokenBucketStore {
    connection: Connection,
    /// Seed URLs used only to bootstrap the standalone connection (a
    /// single entry). In cluster mode the real master list for a
    /// cross-shard SCAN is discovered at delete time via `CLUSTER NODES`
    /// rather than trusted from whatever seed list the constructor
    /// received, since seeds are commonly a subset of the cluster and may
    /// include replicas that reject UNLINK.
    node_urls: Vec<String>,
    script_sha: RwLock<Option<String>>,
}

impl RedisTokenBucketStore {
    pub async fn standalone(url: &str) -> Result<Self, FluxGateError> {
        let client = redis::Client::open(url).map_err(to_store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(to_store_err)?;
        Ok(Self {
            connection: Connection::Standalone(conn),
            node_urls: vec![url.to_string()],
            script_sha: RwLock::new(None),
        })
    }

    pub async fn cluster(nodes: Vec<String>) -> Result<Self, FluxGateError> {
        let client = ClusterClient::new(nodes.clone()).map_err(to_store_err)?;
        let conn = client.get_async_connection().await.map_err(to_store_err)?;
        Ok(Self {
            connection: Connection::Cluster(conn),
            node_urls: nodes,
            script_sha: RwLock::new(None),
        })
    }

    fn cached_sha(&self) -> Option<String> {
        self.script_sha.read().expect("script sha lock poisoned").clone()
    }

    fn publish_sha(&self, sha: String) {
        *self.script_sha.write().expect("script sha lock poisoned") = Some(sha);
    }

    /// `fg:{ruleSetId}:rest` — the hash tag is the literal rule set id so
    /// every bucket of one rule set hashes to the same cluster slot.
    fn wire_key(key: &str) -> String {
        match key.split_once(':') {
            Some((rule_set_id, rest)) => format!("fg:{{{}}}:{}", rule_set_id, rest),
            None => format!("fg:{{{}}}", key),
        }
    }

    async fn eval_consume(
        &self,
        wire_key: &str,
        capacity: u64,
        window_micros: u64,
        permits: u64,
        now_micros: u64,
        ttl_secs: u64,
    ) -> Result<(i64, u64, u64), FluxGateError> {
        if let Some(sha) = self.cached_sha() {
            let result = self
                .evalsha(
                    &sha,
                    wire_key,
                    capacity,
                    window_micros,
                    permits,
                    now_micros,
                    ttl_secs,
                )
                .await;
            match result {
                Ok(v) => return Ok(v),
                Err(e) if is_noscript(&e) => {
                    tracing::debug!("consume script not loaded on this node, reloading");
                }
                Err(e) => return Err(to_store_err(e)),
            }
        }

        let sha = self.load_script().await?;
        self.publish_sha(sha.clone());
        self.evalsha(
            &sha,
            wire_key,
            capacity,
            window_micros,
            permits,
            now_micros,
            ttl_secs,
        )
        .await
        .map_err(to_store_err)
    }

    async fn load_script(&self) -> Result<String, FluxGateError> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(CONSUME_SCRIPT);
        match &self.connection {
            Connection::Standalone(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await.map_err(to_store_err)
            }
            Connection::Cluster(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await.map_err(to_store_err)
            }
        }
    }

    async fn evalsha(
        &self,
        sha: &str,
        wire_key: &str,
        capacity: u64,
        window_micros: u64,
        permits: u64,
        now_micros: u64,
        ttl_secs: u64,
    ) -> redis::RedisResult<(i64, u64, u64)> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha)
            .arg(1)
            .arg(wire_key)
            .arg(capacity)
            .arg(window_micros)
            .arg(permits)
            .arg(now_micros)
            .arg(ttl_secs);

        match &self.connection {
            Connection::Standalone(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await
            }
            Connection::Cluster(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await
            }
        }
    }

    /// Returns the URLs of every master node to scan for deletion. For a
    /// standalone connection that's just the single configured node; for a
    /// cluster, the seed list is ignored in favor of `CLUSTER NODES`,
    /// which reports the topology actually in effect.
    async fn masters_for_scan(&self) -> Result<Vec<String>, FluxGateError> {
        match &self.connection {
            Connection::Standalone(_) => Ok(self.node_urls.clone()),
            Connection::Cluster(conn) => {
                let mut conn = conn.clone();
                let nodes: String = redis::cmd("CLUSTER")
                    .arg("NODES")
                    .query_async(&mut conn)
                    .await
                    .map_err(to_store_err)?;
                Ok(parse_cluster_masters(&nodes))
            }
        }
    }

    async fn scan_and_unlink(&self, pattern: &str) -> Result<u64, FluxGateError> {
        let masters = self.masters_for_scan().await?;
        let mut total = 0u64;
        for url in &masters {
            let client = redis::Client::open(url.as_str()).map_err(to_store_err)?;
            let mut conn = client.get_multiplexed_async_connection().await.map_err(to_store_err)?;
            let mut cursor: u64 = 0;
            loop {
                let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(1000)
                    .query_async(&mut conn)
                    .await
                    .map_err(to_store_err)?;
                if !keys.is_empty() {
                    let removed: u64 = conn.unlink(&keys).await.map_err(to_store_err)?;
                    total += removed;
                }
                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }
        Ok(total)
    }
}

/// Parses `CLUSTER NODES`' plain-text reply into `redis://host:port` URLs
/// for every master that isn't marked `fail`/`fail?`. Each line is
/// `<id> <ip:port@cport> <flags> <master> <ping-sent> <pong-recv>
/// <config-epoch> <link-state> <slot> ...`.
fn parse_cluster_masters(nodes: &str) -> Vec<String> {
    nodes
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let addr = fields.get(1)?;
            let flags = fields.get(2)?;
            if !flags.split(',').any(|f| f == "master") || flags.contains("fail") {
                return None;
            }
            let host_port = addr.split('@').next()?;
            Some(format!("redis://{}", host_port))
        })
        .collect()
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn is_noscript(err: &redis::RedisError) -> bool {
    err.code() == Some("NOSCRIPT")
}

fn to_store_err(err: redis::RedisError) -> FluxGateError {
    FluxGateError::StoreUnavailable {
        message: err.to_string(),
    }
}

#[async_trait]
impl TokenBucketStore for RedisTokenBucketStore {
    async fn try_consume(
        &self,
        key: &str,
        band: &RateLimitBand,
        permits: u64,
    ) -> Result<BucketState, FluxGateError> {
        let wire_key = Self::wire_key(key);
        let window_micros = band.window.as_micros() as u64;
        let ttl_secs = band.ttl().as_secs().max(1);

        let (consumed, tokens, wait_nanos) = self
            .eval_consume(
                &wire_key,
                band.capacity,
                window_micros,
                permits,
                now_micros(),
                ttl_secs,
            )
            .await?;

        Ok(BucketState {
            consumed: consumed == 1,
            remaining_tokens: tokens,
            nanos_to_wait_for_refill: wait_nanos,
        })
    }

    async fn delete_by_rule_set(&self, rule_set_id: &str) -> Result<u64, FluxGateError> {
        self.scan_and_unlink(&format!("fg:{{{}}}:*", rule_set_id)).await
    }

    async fn delete_all(&self) -> Result<u64, FluxGateError> {
        self.scan_and_unlink("fg:*").await
    }

    async fn close(&self) -> Result<(), FluxGateError> {
        Ok(())
    }
}
