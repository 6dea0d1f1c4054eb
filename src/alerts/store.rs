//! Active alerts and bounded alert history.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::{Alert, AlertStatus};
use crate::ai::Anomaly;
use crate::rules::Rule;

/// Default number of history entries kept in memory
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default number of active anomaly alerts kept per rule
pub const DEFAULT_ANOMALY_LIMIT: usize = 50;

/// Reason recorded when a newer anomaly pushes an old one out
pub const SUPERSEDED_REASON: &str = "superseded by newer anomaly";

/// Result of [`AlertStore::create`]
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Alert),
    /// The rule already has an active alert; nothing changed
    Existing(Alert),
}

/// Result of [`AlertStore::create_anomaly`]
#[derive(Debug, Clone)]
pub struct AnomalyOutcome {
    pub alert: Alert,
    /// Oldest anomaly alert of the same rule, resolved to stay within the
    /// per-rule limit
    pub superseded: Option<Alert>,
}

#[derive(Default)]
struct AlertState {
    /// Keyed by rule id for threshold-style rules, by alert id for anomalies
    active: HashMap<String, Alert>,
    history: VecDeque<Alert>,
}

impl AlertState {
    fn key_of(&self, alert_id: &str) -> Option<String> {
        if self.active.contains_key(alert_id) {
            return Some(alert_id.to_string());
        }
        self.active
            .iter()
            .find(|(_, alert)| alert.id == alert_id)
            .map(|(key, _)| key.clone())
    }

    fn push_history(&mut self, alert: Alert, limit: usize) {
        self.history.push_back(alert);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Key of the oldest anomaly alert of `rule_id` once the rule holds more
    /// than `limit` of them
    fn oldest_anomaly_over(&self, rule_id: &str, limit: usize) -> Option<String> {
        let mut anomalies: Vec<&Alert> = self
            .active
            .iter()
            .filter(|(key, alert)| alert.rule_id == rule_id && key.as_str() == alert.id)
            .map(|(_, alert)| alert)
            .collect();
        if anomalies.len() <= limit {
            return None;
        }
        anomalies.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        anomalies.first().map(|alert| alert.id.clone())
    }

    fn resolve_key(&mut self, key: &str, reason: &str, limit: usize) -> Option<Alert> {
        let mut alert = self.active.remove(key)?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.resolution_reason = Some(reason.to_string());
        self.push_history(alert.clone(), limit);
        Some(alert)
    }
}

pub struct AlertStore {
    state: RwLock<AlertState>,
    history_limit: usize,
    anomaly_limit: usize,
}

impl AlertStore {
    pub fn new(history_limit: usize) -> Arc<Self> {
        Self::with_limits(history_limit, DEFAULT_ANOMALY_LIMIT)
    }

    pub fn with_limits(history_limit: usize, anomaly_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(AlertState::default()),
            history_limit: history_limit.max(1),
            anomaly_limit: anomaly_limit.max(1),
        })
    }

    /// Create a firing alert for a threshold-style rule unless the rule
    /// already has an active one.
    pub async fn create(&self, rule: &Rule, source: &str, value: f64, metrics: Value) -> CreateOutcome {
        let mut state = self.state.write().await;
        if let Some(existing) = state.active.get(&rule.id) {
            return CreateOutcome::Existing(existing.clone());
        }

        let alert = Alert::from_rule(rule, source, value, metrics);
        state.active.insert(rule.id.clone(), alert.clone());
        state.push_history(alert.clone(), self.history_limit);
        debug!(alert_id = %alert.id, rule_id = %rule.id, "Alert created");
        CreateOutcome::Created(alert)
    }

    /// Create an independently keyed alert for one anomaly. Anomaly alerts
    /// never clear on their own, so a rule holding more than the anomaly
    /// limit has its oldest one resolved.
    pub async fn create_anomaly(&self, rule: &Rule, source: &str, anomaly: &Anomaly, metrics: Value) -> AnomalyOutcome {
        let alert = Alert::from_anomaly(rule, source, anomaly, metrics);
        let mut state = self.state.write().await;
        state.active.insert(alert.id.clone(), alert.clone());
        state.push_history(alert.clone(), self.history_limit);
        debug!(alert_id = %alert.id, rule_id = %rule.id, "Anomaly alert created");

        let superseded = state
            .oldest_anomaly_over(&rule.id, self.anomaly_limit)
            .and_then(|key| state.resolve_key(&key, SUPERSEDED_REASON, self.history_limit));
        AnomalyOutcome { alert, superseded }
    }

    /// Resolve an active alert by alert id (or by the rule id it is keyed
    /// under). Returns `None` if nothing active matches.
    pub async fn resolve(&self, alert_id: &str, reason: &str) -> Option<Alert> {
        let mut state = self.state.write().await;
        let key = state.key_of(alert_id)?;
        state.resolve_key(&key, reason, self.history_limit)
    }

    /// Resolve the active alert keyed under a threshold-style rule
    pub async fn resolve_rule(&self, rule_id: &str, reason: &str) -> Option<Alert> {
        if self.state.read().await.active.contains_key(rule_id) {
            self.resolve(rule_id, reason).await
        } else {
            None
        }
    }

    /// Mark an active alert acknowledged. It stays in the active map, so the
    /// rule does not fire again until the alert resolves.
    pub async fn acknowledge(&self, alert_id: &str) -> Option<Alert> {
        let mut state = self.state.write().await;
        let key = state.key_of(alert_id)?;
        let alert = state.active.get_mut(&key)?;
        if alert.status != AlertStatus::Acknowledged {
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_at = Some(Utc::now());
        }
        Some(alert.clone())
    }

    /// Merge enrichment fields into an active alert. Later writes to the same
    /// key win.
    pub async fn merge_annotations(&self, alert_id: &str, fields: BTreeMap<String, Value>) -> Option<Alert> {
        let mut state = self.state.write().await;
        let key = state.key_of(alert_id)?;
        let alert = state.active.get_mut(&key)?;
        alert.annotations.extend(fields);
        Some(alert.clone())
    }

    pub async fn get(&self, alert_id: &str) -> Option<Alert> {
        let state = self.state.read().await;
        let key = state.key_of(alert_id)?;
        state.active.get(&key).cloned()
    }

    /// Active alerts, oldest first
    pub async fn get_active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.state.read().await.active.values().cloned().collect();
        alerts.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        alerts
    }

    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    /// The most recent `limit` history entries, oldest first
    pub async fn get_history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// The most recent `n` history entries, newest first
    pub async fn recent_history(&self, n: usize) -> Vec<Alert> {
        self.state.read().await.history.iter().rev().take(n).cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// Drop every active alert and all history
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.active.clear();
        state.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use serde_json::json;

    fn threshold_rule(id: &str) -> Rule {
        serde_json::from_value(json!({
            "id": id, "name": format!("Rule {}", id), "type": "threshold",
            "query": "system_cpu_usage", "condition": ">", "threshold": 80,
            "severity": "error", "annotations": { "summary": "cpu hot" }
        }))
        .unwrap()
    }

    fn anomaly_rule() -> Rule {
        serde_json::from_value(json!({
            "id": "anomaly", "name": "Anomaly", "type": "ai_anomaly"
        }))
        .unwrap()
    }

    fn anomaly(severity: Severity) -> Anomaly {
        Anomaly {
            metric: Some("db_latency".to_string()),
            value: Some(930.0),
            severity,
            description: "Latency spike".to_string(),
            confidence: Some(0.9),
        }
    }

    #[tokio::test]
    async fn test_create_is_deduplicated_per_rule() {
        let store = AlertStore::new(10);
        let rule = threshold_rule("cpu_high");

        let first = store.create(&rule, "prometheus", 85.0, json!({"system_cpu_usage": 85})).await;
        let CreateOutcome::Created(created) = first else {
            panic!("first create should insert");
        };
        assert_eq!(created.status, AlertStatus::Firing);
        assert_eq!(created.severity, Severity::Error);
        assert_eq!(created.annotations.get("summary"), Some(&json!("cpu hot")));

        let second = store.create(&rule, "prometheus", 90.0, json!({})).await;
        let CreateOutcome::Existing(existing) = second else {
            panic!("second create should return the active alert");
        };
        assert_eq!(existing.id, created.id);
        assert_eq!(store.active_count().await, 1);
        assert_eq!(store.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_anomaly_alerts_are_keyed_independently() {
        let store = AlertStore::new(10);
        let rule = anomaly_rule();

        let a = store.create_anomaly(&rule, "gcp", &anomaly(Severity::Error), json!({})).await.alert;
        let b = store.create_anomaly(&rule, "gcp", &anomaly(Severity::Critical), json!({})).await.alert;

        assert_ne!(a.id, b.id);
        assert_eq!(store.active_count().await, 2);
        assert_eq!(a.explanation.as_deref(), Some("Latency spike"));
        assert_eq!(a.labels.get("metric").map(String::as_str), Some("db_latency"));
    }

    #[tokio::test]
    async fn test_resolve_moves_alert_to_history() {
        let store = AlertStore::new(10);
        let rule = threshold_rule("cpu_high");
        let CreateOutcome::Created(alert) = store.create(&rule, "all", 85.0, json!({})).await else {
            panic!("expected created");
        };

        let resolved = store.resolve(&alert.id, "manual").await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolution_reason.as_deref(), Some("manual"));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.starts_at, alert.starts_at);

        assert!(store.get_active().await.is_empty());
        assert!(store.resolve(&alert.id, "again").await.is_none());

        let history = store.get_history(10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn test_acknowledged_alert_still_blocks_refire() {
        let store = AlertStore::new(10);
        let rule = threshold_rule("cpu_high");
        let CreateOutcome::Created(alert) = store.create(&rule, "all", 85.0, json!({})).await else {
            panic!("expected created");
        };

        let acked = store.acknowledge(&alert.id).await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());

        assert!(matches!(
            store.create(&rule, "all", 95.0, json!({})).await,
            CreateOutcome::Existing(_)
        ));
        assert!(store.acknowledge("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_history_is_capped_fifo() {
        let store = AlertStore::new(3);
        let mut ids = Vec::new();
        for i in 0..4 {
            let rule = threshold_rule(&format!("rule-{}", i));
            if let CreateOutcome::Created(alert) = store.create(&rule, "all", 1.0, json!({})).await {
                ids.push(alert.id);
            }
        }

        let history = store.get_history(100).await;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|a| a.id != ids[0]));
        assert_eq!(history.last().map(|a| a.id.clone()), Some(ids[3].clone()));

        let latest = store.get_history(1).await;
        assert_eq!(latest[0].id, ids[3]);
    }

    #[tokio::test]
    async fn test_merge_annotations_last_write_wins() {
        let store = AlertStore::new(10);
        let alert = store
            .create_anomaly(&anomaly_rule(), "all", &anomaly(Severity::Error), json!({}))
            .await
            .alert;

        let mut first = BTreeMap::new();
        first.insert("aiRecommendations".to_string(), json!(["restart"]));
        store.merge_annotations(&alert.id, first).await.unwrap();

        let mut second = BTreeMap::new();
        second.insert("aiRecommendations".to_string(), json!(["scale out"]));
        let merged = store.merge_annotations(&alert.id, second).await.unwrap();

        assert_eq!(merged.annotations.get("aiRecommendations"), Some(&json!(["scale out"])));
        assert_eq!(merged.id, alert.id);
        assert!(store.merge_annotations("missing", BTreeMap::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_anomaly_limit_supersedes_oldest() {
        let store = AlertStore::with_limits(10, 2);
        let rule = anomaly_rule();

        let first = store.create_anomaly(&rule, "gcp", &anomaly(Severity::Error), json!({})).await;
        assert!(first.superseded.is_none());
        store.create_anomaly(&rule, "gcp", &anomaly(Severity::Error), json!({})).await;
        let third = store.create_anomaly(&rule, "gcp", &anomaly(Severity::Critical), json!({})).await;

        let superseded = third.superseded.unwrap();
        assert_eq!(superseded.id, first.alert.id);
        assert_eq!(superseded.status, AlertStatus::Resolved);
        assert_eq!(superseded.resolution_reason.as_deref(), Some(SUPERSEDED_REASON));
        assert_eq!(store.active_count().await, 2);
        assert!(store.get(&first.alert.id).await.is_none());

        // Threshold alerts of other rules are untouched
        let threshold = threshold_rule("cpu_high");
        store.create(&threshold, "all", 85.0, json!({})).await;
        store.create_anomaly(&rule, "gcp", &anomaly(Severity::Error), json!({})).await;
        assert_eq!(store.active_count().await, 3);
        assert!(store.get("cpu_high").await.is_some());
    }

    #[tokio::test]
    async fn test_recent_history_is_newest_first() {
        let store = AlertStore::new(10);
        for i in 0..3 {
            store.create(&threshold_rule(&format!("rule-{}", i)), "all", 1.0, json!({})).await;
        }

        let recent = store.recent_history(2).await;
        let rules: Vec<&str> = recent.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(rules, vec!["rule-2", "rule-1"]);
        assert_eq!(store.recent_history(100).await.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_drops_active_and_history() {
        let store = AlertStore::new(10);
        store.create(&threshold_rule("cpu_high"), "all", 85.0, json!({})).await;

        store.clear().await;

        assert_eq!(store.active_count().await, 0);
        assert_eq!(store.history_len().await, 0);
        assert!(matches!(
            store.create(&threshold_rule("cpu_high"), "all", 85.0, json!({})).await,
            CreateOutcome::Created(_)
        ));
    }
}
