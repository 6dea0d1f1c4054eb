use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ai::Anomaly;
use crate::rules::{Rule, RuleKind, Severity};

/// Label carrying the resource type an anomaly alert was scoped to
pub const RESOURCE_TYPE_LABEL: &str = "resourceType";

/// Current status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

/// One batch of metrics delivered by an external collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub source: String,
    pub metrics: Value,
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn new(source: impl Into<String>, metrics: Value) -> Self {
        Self {
            source: source.into(),
            metrics,
            collected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    #[serde(alias = "timestamp")]
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_reason: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_details: Option<Anomaly>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Alert {
    /// New firing alert for a threshold-style rule
    pub fn from_rule(rule: &Rule, source: &str, value: f64, metrics: Value) -> Self {
        let mut alert = Self::firing(rule, source, rule.severity, metrics);
        alert.value = Some(value);
        alert
    }

    /// New firing alert for one anomaly reported by the analyzer
    pub fn from_anomaly(rule: &Rule, source: &str, anomaly: &Anomaly, metrics: Value) -> Self {
        let mut alert = Self::firing(rule, source, anomaly.severity, metrics);
        alert.value = anomaly.value;
        alert.explanation = Some(anomaly.description.clone());
        alert.anomaly_details = Some(anomaly.clone());
        if let Some(metric) = &anomaly.metric {
            alert.labels.insert("metric".to_string(), metric.clone());
        }
        if let RuleKind::AiAnomaly {
            resource_type: Some(resource_type),
            ..
        } = &rule.kind
        {
            alert
                .labels
                .insert(RESOURCE_TYPE_LABEL.to_string(), resource_type.clone());
        }
        alert
    }

    fn firing(rule: &Rule, source: &str, severity: Severity, metrics: Value) -> Self {
        let mut annotations: BTreeMap<String, Value> = rule
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        if !rule.description.is_empty() {
            annotations
                .entry("description".to_string())
                .or_insert_with(|| Value::String(rule.description.clone()));
        }

        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity,
            status: AlertStatus::Firing,
            starts_at: Utc::now(),
            resolved_at: None,
            acknowledged_at: None,
            resolution_reason: None,
            value: None,
            metrics,
            labels: rule.labels.clone(),
            annotations,
            source: source.to_string(),
            anomaly_details: None,
            explanation: None,
        }
    }

    /// Short human readable summary used by log lines and notification bodies
    pub fn summary(&self) -> String {
        let description = self
            .explanation
            .clone()
            .or_else(|| {
                self.annotations
                    .get("summary")
                    .or_else(|| self.annotations.get("description"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("Rule '{}' triggered", self.rule_name));

        match self.value {
            Some(value) => format!("{} (value: {:.2})", description, value),
            None => description,
        }
    }
}
