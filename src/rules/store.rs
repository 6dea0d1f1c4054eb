use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::defaults::{default_channels, default_rules};
use super::models::Rule;
use crate::notifications::NotificationChannel;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} with id '{id}' already exists")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{kind} with id '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} id '{body}' does not match path id '{path}'")]
    IdMismatch {
        kind: &'static str,
        path: String,
        body: String,
    },
    #[error("Invalid built-in {kind} definitions: {source}")]
    InvalidDefaults {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

trait Identified {
    const KIND: &'static str;
    fn id(&self) -> &str;
}

impl Identified for Rule {
    const KIND: &'static str = "Rule";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for NotificationChannel {
    const KIND: &'static str = "Channel";
    fn id(&self) -> &str {
        &self.id
    }
}

/// In-memory rule and channel definitions with CRUD access
pub struct RuleStore {
    rules: RwLock<Vec<Rule>>,
    channels: RwLock<Vec<NotificationChannel>>,
}

impl RuleStore {
    /// Load rules and channels from JSON files. A missing or malformed file
    /// falls back to the built-in set; only invalid built-in definitions fail.
    pub fn load(rules_path: &Path, channels_path: &Path) -> Result<Arc<Self>, StoreError> {
        let rules = load_section(rules_path, "rules", default_rules)?;
        let channels = load_section(channels_path, "channels", default_channels)?;
        info!("Loaded {} alert rules and {} notification channels", rules.len(), channels.len());
        Self::from_definitions(rules, channels)
    }

    pub fn with_defaults() -> Result<Arc<Self>, StoreError> {
        let rules = parse_defaults(default_rules(), "rules")?;
        let channels = parse_defaults(default_channels(), "channels")?;
        Self::from_definitions(rules, channels)
    }

    pub fn from_definitions(
        rules: Vec<Rule>,
        channels: Vec<NotificationChannel>,
    ) -> Result<Arc<Self>, StoreError> {
        ensure_unique(&rules)?;
        ensure_unique(&channels)?;
        Ok(Arc::new(Self {
            rules: RwLock::new(rules),
            channels: RwLock::new(channels),
        }))
    }

    // ========== Rules ==========

    pub async fn rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    pub async fn get_rule(&self, id: &str) -> Option<Rule> {
        self.rules.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Enabled rules whose source matches the snapshot source or `"all"`
    pub async fn rules_for_source(&self, source: &str) -> Vec<Rule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.applies_to(source))
            .cloned()
            .collect()
    }

    pub async fn add_rule(&self, rule: Rule) -> Result<Rule, StoreError> {
        insert(&mut *self.rules.write().await, rule)
    }

    pub async fn update_rule(&self, id: &str, rule: Rule) -> Result<Rule, StoreError> {
        replace(&mut *self.rules.write().await, id, rule)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<Rule, StoreError> {
        remove(&mut *self.rules.write().await, id)
    }

    // ========== Channels ==========

    pub async fn channels(&self) -> Vec<NotificationChannel> {
        self.channels.read().await.clone()
    }

    pub async fn enabled_channels(&self) -> Vec<NotificationChannel> {
        self.channels
            .read()
            .await
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    pub async fn get_channel(&self, id: &str) -> Option<NotificationChannel> {
        self.channels.read().await.iter().find(|c| c.id == id).cloned()
    }

    pub async fn add_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError> {
        insert(&mut *self.channels.write().await, channel)
    }

    pub async fn update_channel(
        &self,
        id: &str,
        channel: NotificationChannel,
    ) -> Result<NotificationChannel, StoreError> {
        replace(&mut *self.channels.write().await, id, channel)
    }

    pub async fn delete_channel(&self, id: &str) -> Result<NotificationChannel, StoreError> {
        remove(&mut *self.channels.write().await, id)
    }
}

fn insert<T: Identified + Clone>(items: &mut Vec<T>, item: T) -> Result<T, StoreError> {
    if items.iter().any(|existing| existing.id() == item.id()) {
        return Err(StoreError::DuplicateId {
            kind: T::KIND,
            id: item.id().to_string(),
        });
    }
    items.push(item.clone());
    Ok(item)
}

fn replace<T: Identified + Clone>(items: &mut [T], id: &str, item: T) -> Result<T, StoreError> {
    if item.id() != id {
        return Err(StoreError::IdMismatch {
            kind: T::KIND,
            path: id.to_string(),
            body: item.id().to_string(),
        });
    }
    let existing = items
        .iter_mut()
        .find(|existing| existing.id() == id)
        .ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
    *existing = item.clone();
    Ok(item)
}

fn remove<T: Identified>(items: &mut Vec<T>, id: &str) -> Result<T, StoreError> {
    let index = items
        .iter()
        .position(|existing| existing.id() == id)
        .ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })?;
    Ok(items.remove(index))
}

fn ensure_unique<T: Identified>(items: &[T]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id()) {
            return Err(StoreError::DuplicateId {
                kind: T::KIND,
                id: item.id().to_string(),
            });
        }
    }
    Ok(())
}

fn load_section<T>(path: &Path, key: &str, defaults: fn() -> Value) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Identified,
{
    match read_section(path, key) {
        Ok(items) => Ok(items),
        Err(reason) => {
            warn!("Using built-in {} ({}): {}", key, path.display(), reason);
            parse_defaults(defaults(), key)
        }
    }
}

fn read_section<T>(path: &Path, key: &str) -> Result<Vec<T>, String>
where
    T: DeserializeOwned + Identified,
{
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let document: Value = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    let Some(entries) = document.get(key).and_then(Value::as_array) else {
        return Err(format!("missing \"{}\" array", key));
    };

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                let id = entry.get("id").and_then(Value::as_str).unwrap_or("<no id>");
                warn!("Skipping invalid {} entry '{}': {}", key, id, e);
            }
        }
    }

    ensure_unique(&items).map_err(|e| e.to_string())?;
    Ok(items)
}

fn parse_defaults<T>(document: Value, key: &str) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Identified,
{
    let entries = document.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(entries).map_err(|source| StoreError::InvalidDefaults { kind: T::KIND, source })
}
