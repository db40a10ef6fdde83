//! Loads and caches [`RateLimitRuleSet`]s from an underlying repository.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::RwLock;

use crate::domain::rule::RateLimitRule;
use crate::domain::ruleset::RateLimitRuleSet;
use crate::error::FluxGateError;

/// Storage is opaque to the core: a repository only has to answer "what
/// are the rules for this rule set id".
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_by_rule_set_id(&self, rule_set_id: &str) -> Result<Option<Vec<RateLimitRule>>, FluxGateError>;
}

/// A fixed, in-memory repository — for embedding and tests.
#[derive(Default)]
pub struct MemoryRuleRepository {
    rule_sets: RwLock<HashMap<String, Vec<RateLimitRule>>>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, rule_set_id: impl Into<String>, rules: Vec<RateLimitRule>) {
        self.rule_sets.write().await.insert(rule_set_id.into(), rules);
    }
}

#[async_trait]
impl RuleRepository for MemoryRuleRepository {
    async fn find_by_rule_set_id(&self, rule_set_id: &str) -> Result<Option<Vec<RateLimitRule>>, FluxGateError> {
        Ok(self.rule_sets.read().await.get(rule_set_id).cloned())
    }
}

/// A YAML-file-backed repository, re-read from disk on every call (the
/// poller in [`crate::reload::ReloadBus`] is what makes this cheap in
/// practice — it only triggers a reload when the file's mtime advances).
#[derive(Debug, Deserialize)]
struct YamlRuleFile {
    rule_sets: HashMap<String, Vec<RateLimitRule>>,
}

#[derive(Clone)]
pub struct YamlRuleRepository {
    path: PathBuf,
}

impl YamlRuleRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

#[async_trait]
impl RuleRepository for YamlRuleRepository {
    async fn find_by_rule_set_id(&self, rule_set_id: &str) -> Result<Option<Vec<RateLimitRule>>, FluxGateError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| FluxGateError::ConfigurationError {
            message: format!("failed to read rule file {}: {}", self.path.display(), e),
        })?;
        let file: YamlRuleFile = serde_yaml::from_str(&contents).map_err(|e| FluxGateError::ConfigurationError {
            message: format!("failed to parse rule file {}: {}", self.path.display(), e),
        })?;
        Ok(file.rule_sets.get(rule_set_id).cloned())
    }
}

/// Loads a [`RateLimitRuleSet`] by id, optionally caching the result until
/// invalidated by a reload event.
pub struct RuleSetProvider {
    repository: Box<dyn RuleRepository>,
    cache: RwLock<HashMap<String, RateLimitRuleSet>>,
}

impl RuleSetProvider {
    pub fn new(repository: Box<dyn RuleRepository>) -> Self {
        Self {
            repository,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn find_by_id(&self, rule_set_id: &str) -> Result<Option<RateLimitRuleSet>, FluxGateError> {
        if let Some(cached) = self.cache.read().await.get(rule_set_id) {
            return Ok(Some(cached.clone()));
        }

        let rules = match self.repository.find_by_rule_set_id(rule_set_id).await? {
            Some(rules) => rules,
            None => return Ok(None),
        };

        let rule_set = RateLimitRuleSet::new(rule_set_id, rules)?;
        self.cache
            .write()
            .await
            .insert(rule_set_id.to_string(), rule_set.clone());
        Ok(Some(rule_set))
    }

    /// Invalidates one cached rule set, or the whole cache when `None`.
    pub async fn invalidate(&self, rule_set_id: Option<&str>) {
        let mut cache = self.cache.write().await;
        match rule_set_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }
}
