use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::query::MetricQuery;

/// Severity of a rule or alert, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison applied between a resolved value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => value == threshold,
            Comparison::NotEqual => value != threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }
}

/// Source value matching every snapshot
pub const ALL_SOURCES: &str = "all";

/// Alert rule loaded from `{"rules": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Threshold {
        query: MetricQuery,
        condition: Comparison,
        threshold: f64,
    },
    /// Declared in rule files but never evaluated; kept so such rules load.
    RateOfChange {
        query: MetricQuery,
        condition: Comparison,
        threshold: f64,
    },
    AiAnomaly {
        #[serde(rename = "resourceType", default, skip_serializing_if = "Option::is_none")]
        resource_type: Option<String>,
        #[serde(rename = "minSeverity", default)]
        min_severity: Severity,
    },
}

fn default_source() -> String {
    ALL_SOURCES.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn applies_to(&self, source: &str) -> bool {
        self.enabled && (self.source == source || self.source == ALL_SOURCES)
    }

    /// Threshold-style rules keep at most one active alert, keyed by rule id
    pub fn is_keyed_by_rule(&self) -> bool {
        !matches!(self.kind, RuleKind::AiAnomaly { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            RuleKind::Threshold { .. } => "threshold",
            RuleKind::RateOfChange { .. } => "rate_of_change",
            RuleKind::AiAnomaly { .. } => "ai_anomaly",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_threshold_rule() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "cpu_high",
            "name": "High CPU",
            "type": "threshold",
            "source": "prometheus",
            "query": "system_cpu_usage",
            "condition": ">",
            "threshold": 80,
            "severity": "critical",
            "labels": { "team": "infra" }
        }))
        .unwrap();

        assert_eq!(rule.id, "cpu_high");
        assert!(rule.enabled);
        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.type_name(), "threshold");
        let RuleKind::Threshold { query, condition, threshold } = &rule.kind else {
            panic!("expected threshold rule");
        };
        assert_eq!(*query, MetricQuery::DirectKey("system_cpu_usage".to_string()));
        assert_eq!(*condition, Comparison::GreaterThan);
        assert_eq!(*threshold, 80.0);
    }

    #[test]
    fn test_parse_ai_anomaly_rule_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "db_anomaly",
            "name": "Database anomaly",
            "type": "ai_anomaly",
            "resourceType": "database"
        }))
        .unwrap();

        assert_eq!(rule.source, ALL_SOURCES);
        assert!(!rule.is_keyed_by_rule());
        let RuleKind::AiAnomaly { resource_type, min_severity } = &rule.kind else {
            panic!("expected ai_anomaly rule");
        };
        assert_eq!(resource_type.as_deref(), Some("database"));
        assert_eq!(*min_severity, Severity::Warning);
    }

    #[test]
    fn test_rule_with_invalid_query_is_rejected() {
        let result: Result<Rule, _> = serde_json::from_value(json!({
            "id": "broken",
            "name": "Broken",
            "type": "threshold",
            "query": "latency{le=",
            "condition": ">",
            "threshold": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_applies_to_source() {
        let mut rule: Rule = serde_json::from_value(json!({
            "id": "r", "name": "r", "type": "threshold", "source": "azure",
            "query": "x", "condition": "<", "threshold": 1
        }))
        .unwrap();

        assert!(rule.applies_to("azure"));
        assert!(!rule.applies_to("gcp"));
        rule.source = ALL_SOURCES.to_string();
        assert!(rule.applies_to("gcp"));
        rule.enabled = false;
        assert!(!rule.applies_to("gcp"));
    }

    #[test]
    fn test_severity_order_and_comparisons() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Error < Severity::Critical);
        assert!(Comparison::GreaterOrEqual.holds(80.0, 80.0));
        assert!(!Comparison::GreaterThan.holds(80.0, 80.0));
        assert!(Comparison::NotEqual.holds(1.0, 2.0));
    }
}
