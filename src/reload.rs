//! Delivers rule-change notifications to listeners: a Redis pub/sub push
//! path plus a polling fallback, so a missed pub/sub message (or a cold
//! start) is still eventually covered.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

use crate::provider::YamlRuleRepository;

const RELOAD_CHANNEL: &str = "fluxgate:rule-reload";
const VERSION_KEY: &str = "fluxgate:rule-version";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleReloadEvent {
    pub rule_set_id: Option<String>,
    pub full_reload: bool,
    pub ts_millis: i64,
}

impl RuleReloadEvent {
    pub fn full(ts_millis: i64) -> Self {
        Self {
            rule_set_id: None,
            full_reload: true,
            ts_millis,
        }
    }

    pub fn for_rule_set(rule_set_id: impl Into<String>, ts_millis: i64) -> Self {
        Self {
            rule_set_id: Some(rule_set_id.into()),
            full_reload: false,
            ts_millis,
        }
    }
}

/// A listener is any async closure-like sink; [`crate::reset::BucketResetHandler`]
/// is the one concrete listener this crate ships.
#[async_trait]
pub trait ReloadListener: Send + Sync {
    async fn on_reload(&self, event: RuleReloadEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Reconnecting,
    Closed,
}

/// Publishes and subscribes to rule-reload notifications. Delivery is
/// at-least-once; listeners MUST tolerate duplicates.
pub struct ReloadBus {
    client: redis::Client,
    poll_interval: Duration,
    state: Arc<std::sync::RwLock<SubscriptionState>>,
    last_seen_version: AtomicU64,
    sender: broadcast::Sender<RuleReloadEvent>,
    /// A file-backed rule repository to watch by mtime on each poll tick,
    /// for deployments where rules are edited on disk without a matching
    /// Redis version bump.
    file_watch: Option<Arc<YamlRuleRepository>>,
    last_seen_mtime: RwLock<Option<SystemTime>>,
}

impl ReloadBus {
    pub fn new(client: redis::Client, poll_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            client,
            poll_interval,
            state: Arc::new(std::sync::RwLock::new(SubscriptionState::Subscribing)),
            last_seen_version: AtomicU64::new(0),
            sender,
            file_watch: None,
            last_seen_mtime: RwLock::new(None),
        }
    }

    /// Like [`Self::new`], additionally polling `repository`'s mtime on
    /// each tick and synthesizing a full reload event when it advances.
    pub fn with_file_watch(client: redis::Client, poll_interval: Duration, repository: Arc<YamlRuleRepository>) -> Self {
        let mut bus = Self::new(client, poll_interval);
        bus.file_watch = Some(repository);
        bus
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.read().expect("reload bus state lock poisoned")
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.write().expect("reload bus state lock poisoned") = state;
    }

    pub async fn publish(&self, event: &RuleReloadEvent) -> Result<(), redis::RedisError> {
        let payload = serde_json::to_string(event).expect("RuleReloadEvent always serializes");
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.publish(RELOAD_CHANNEL, payload).await?;
        let _: i64 = conn.incr(VERSION_KEY, 1).await?;
        Ok(())
    }

    /// Subscribes to `listener` and spawns the background push + poll
    /// tasks. Returns immediately; the tasks run for the lifetime of the
    /// returned handle.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn ReloadListener>) -> broadcast::Receiver<RuleReloadEvent> {
        let receiver = self.sender.subscribe();

        let bus = Arc::clone(self);
        let push_listener = Arc::clone(&listener);
        tokio::spawn(async move {
            bus.run_pubsub_loop(push_listener).await;
        });

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            bus.run_poll_loop(listener).await;
        });

        receiver
    }

    async fn run_pubsub_loop(&self, listener: Arc<dyn ReloadListener>) {
        loop {
            self.set_state(SubscriptionState::Subscribing);
            let client = self.client.clone();
            match client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if pubsub.subscribe(RELOAD_CHANNEL).await.is_err() {
                        self.set_state(SubscriptionState::Reconnecting);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    self.set_state(SubscriptionState::Subscribed);
                    let mut stream = pubsub.on_message();
                    use futures_util::StreamExt;
                    while let Some(msg) = stream.next().await {
                        if let Ok(payload) = msg.get_payload::<String>() {
                            if let Ok(event) = serde_json::from_str::<RuleReloadEvent>(&payload) {
                                let _ = self.sender.send(event.clone());
                                listener.on_reload(event).await;
                            }
                        }
                    }
                    self.set_state(SubscriptionState::Reconnecting);
                }
                Err(_) => {
                    self.set_state(SubscriptionState::Reconnecting);
                }
            }

            if self.state() == SubscriptionState::Closed {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn run_poll_loop(&self, listener: Arc<dyn ReloadListener>) {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.state() == SubscriptionState::Closed {
                return;
            }

            if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
                let version: Option<u64> = conn.get(VERSION_KEY).await.ok().flatten();
                let version = version.unwrap_or(0);
                let previous = self.last_seen_version.swap(version, Ordering::SeqCst);
                if version != previous {
                    let event = RuleReloadEvent::full(0);
                    let _ = self.sender.send(event.clone());
                    listener.on_reload(event).await;
                }
            }

            if let Some(mtime) = self.file_watch.as_ref().and_then(|repo| repo.mtime()) {
                let previous = {
                    let mut guard = self.last_seen_mtime.write().expect("reload bus mtime lock poisoned");
                    let previous = *guard;
                    *guard = Some(mtime);
                    previous
                };
                if let Some(previous) = previous {
                    if previous != mtime {
                        let event = RuleReloadEvent::full(0);
                        let _ = self.sender.send(event.clone());
                        listener.on_reload(event).await;
                    }
                }
            }
        }
    }

    pub fn close(&self) {
        self.set_state(SubscriptionState::Closed);
    }
}
