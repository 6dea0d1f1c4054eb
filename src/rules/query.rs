use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Addressing expression of a rule, parsed once when the rule is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricQuery {
    /// `metric_name{label="value",...}`
    LabelSelector {
        metric: String,
        labels: BTreeMap<String, String>,
    },
    /// `system.cpu.usage`
    DotPath(Vec<String>),
    /// `system_cpu_usage`
    DirectKey(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("Query is empty")]
    Empty,
    #[error("Label selector is missing a closing brace: {0}")]
    UnclosedSelector(String),
    #[error("Label selector has no metric name: {0}")]
    MissingMetricName(String),
    #[error("Invalid label matcher '{0}', expected name=\"value\"")]
    InvalidMatcher(String),
    #[error("Dot path has an empty segment: {0}")]
    EmptySegment(String),
}

impl MetricQuery {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(QueryError::Empty);
        }

        if let Some(open) = raw.find('{') {
            return Self::parse_selector(raw, open);
        }

        if raw.contains('.') {
            let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(QueryError::EmptySegment(raw.to_string()));
            }
            return Ok(MetricQuery::DotPath(segments));
        }

        Ok(MetricQuery::DirectKey(raw.to_string()))
    }

    fn parse_selector(raw: &str, open: usize) -> Result<Self, QueryError> {
        let metric = raw[..open].trim();
        if metric.is_empty() {
            return Err(QueryError::MissingMetricName(raw.to_string()));
        }
        let body = raw[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| QueryError::UnclosedSelector(raw.to_string()))?;

        let mut labels = BTreeMap::new();
        for matcher in split_matchers(body).into_iter().map(str::trim).filter(|m| !m.is_empty()) {
            let (name, value) = matcher
                .split_once('=')
                .ok_or_else(|| QueryError::InvalidMatcher(matcher.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(QueryError::InvalidMatcher(matcher.to_string()));
            }
            labels.insert(name.to_string(), unquote(value.trim()).to_string());
        }

        Ok(MetricQuery::LabelSelector {
            metric: metric.to_string(),
            labels,
        })
    }

    /// Resolve the query against a snapshot. `None` means the rule does not
    /// fire this cycle: either nothing matched or the match is not numeric.
    pub fn resolve(&self, snapshot: &Value) -> Option<f64> {
        let found = match self {
            MetricQuery::LabelSelector { metric, labels } => find_labeled(snapshot, metric, labels),
            MetricQuery::DotPath(segments) => walk_path(snapshot, segments),
            MetricQuery::DirectKey(key) => snapshot.get(key),
        }?;
        coerce_number(found)
    }
}

/// Split selector matchers on commas outside quoted values
fn split_matchers(body: &str) -> Vec<&str> {
    let mut matchers = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, ',') => {
                matchers.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    matchers.push(&body[start..]);
    matchers
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

fn walk_path<'a>(snapshot: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(snapshot, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn find_labeled<'a>(
    node: &'a Value,
    metric: &str,
    selector: &BTreeMap<String, String>,
) -> Option<&'a Value> {
    match node {
        Value::Object(map) => {
            if let Some(direct) = map.get(metric) {
                if let Some(value) = labeled_value(direct, selector) {
                    return Some(value);
                }
            }
            map.values().find_map(|child| find_labeled(child, metric, selector))
        }
        Value::Array(items) => {
            let named = items.iter().find_map(|item| {
                let record = item.as_object()?;
                if record.get("name").and_then(Value::as_str) != Some(metric) {
                    return None;
                }
                if labels_match(record.get("labels"), selector) {
                    record.get("value")
                } else {
                    None
                }
            });
            named.or_else(|| items.iter().find_map(|child| find_labeled(child, metric, selector)))
        }
        _ => None,
    }
}

/// A directly keyed metric carries labels either as a single record or as a
/// list of records.
fn labeled_value<'a>(entry: &'a Value, selector: &BTreeMap<String, String>) -> Option<&'a Value> {
    match entry {
        Value::Object(record) if record.contains_key("value") => {
            labels_match(record.get("labels"), selector).then(|| &record["value"])
        }
        Value::Array(records) => records.iter().find_map(|record| {
            let record = record.as_object()?;
            if labels_match(record.get("labels"), selector) {
                record.get("value")
            } else {
                None
            }
        }),
        // A bare scalar has no labels and only satisfies an empty selector
        scalar if selector.is_empty() && !scalar.is_object() => Some(scalar),
        _ => None,
    }
}

fn labels_match(labels: Option<&Value>, selector: &BTreeMap<String, String>) -> bool {
    if selector.is_empty() {
        return true;
    }
    let Some(labels) = labels.and_then(Value::as_object) else {
        return false;
    };
    selector.iter().all(|(name, expected)| match labels.get(name) {
        Some(Value::String(actual)) => actual == expected,
        Some(Value::Number(actual)) => actual.to_string() == *expected,
        Some(Value::Bool(actual)) => actual.to_string() == *expected,
        _ => false,
    })
}

fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

impl TryFrom<String> for MetricQuery {
    type Error = QueryError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        MetricQuery::parse(&raw)
    }
}

impl From<MetricQuery> for String {
    fn from(query: MetricQuery) -> Self {
        query.to_string()
    }
}

impl fmt::Display for MetricQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricQuery::LabelSelector { metric, labels } => {
                let matchers: Vec<String> = labels
                    .iter()
                    .map(|(name, value)| format!("{}=\"{}\"", name, value))
                    .collect();
                write!(f, "{}{{{}}}", metric, matchers.join(","))
            }
            MetricQuery::DotPath(segments) => write!(f, "{}", segments.join(".")),
            MetricQuery::DirectKey(key) => write!(f, "{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            MetricQuery::parse("system_cpu_usage").unwrap(),
            MetricQuery::DirectKey("system_cpu_usage".to_string())
        );
        assert_eq!(
            MetricQuery::parse("system.cpu.usage").unwrap(),
            MetricQuery::DotPath(vec!["system".into(), "cpu".into(), "usage".into()])
        );

        let selector = MetricQuery::parse(r#"http_requests{method="GET", code='500'}"#).unwrap();
        let MetricQuery::LabelSelector { metric, labels } = selector else {
            panic!("expected label selector");
        };
        assert_eq!(metric, "http_requests");
        assert_eq!(labels.get("method").map(String::as_str), Some("GET"));
        assert_eq!(labels.get("code").map(String::as_str), Some("500"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(MetricQuery::parse("  "), Err(QueryError::Empty));
        assert!(matches!(
            MetricQuery::parse(r#"cpu{mode="idle""#),
            Err(QueryError::UnclosedSelector(_))
        ));
        assert!(matches!(
            MetricQuery::parse(r#"{mode="idle"}"#),
            Err(QueryError::MissingMetricName(_))
        ));
        assert!(matches!(MetricQuery::parse("cpu{mode}"), Err(QueryError::InvalidMatcher(_))));
        assert!(matches!(MetricQuery::parse("system..cpu"), Err(QueryError::EmptySegment(_))));
    }

    #[test]
    fn test_selector_value_may_contain_comma() {
        let query = MetricQuery::parse(r#"request_duration_bucket{le="0.5,1", job='api'}"#).unwrap();
        let MetricQuery::LabelSelector { metric, labels } = &query else {
            panic!("expected label selector");
        };
        assert_eq!(metric, "request_duration_bucket");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["le"], "0.5,1");
        assert_eq!(labels["job"], "api");

        let snapshot = json!({
            "request_duration_bucket": [
                { "labels": { "le": "0.5", "job": "api" }, "value": 3 },
                { "labels": { "le": "0.5,1", "job": "api" }, "value": 11 }
            ]
        });
        assert_eq!(query.resolve(&snapshot), Some(11.0));
    }

    #[test]
    fn test_resolve_direct_key_and_numeric_string() {
        let snapshot = json!({ "system_cpu_usage": 85, "load": "1.5", "status": "ok" });

        assert_eq!(MetricQuery::parse("system_cpu_usage").unwrap().resolve(&snapshot), Some(85.0));
        assert_eq!(MetricQuery::parse("load").unwrap().resolve(&snapshot), Some(1.5));
        assert_eq!(MetricQuery::parse("status").unwrap().resolve(&snapshot), None);
        assert_eq!(MetricQuery::parse("missing").unwrap().resolve(&snapshot), None);
    }

    #[test]
    fn test_resolve_dot_path() {
        let snapshot = json!({
            "system": { "memory": { "used_percent": 72.5 } },
            "disks": [ { "usage": 40 }, { "usage": 91 } ]
        });

        let query = MetricQuery::parse("system.memory.used_percent").unwrap();
        assert_eq!(query.resolve(&snapshot), Some(72.5));

        let query = MetricQuery::parse("disks.1.usage").unwrap();
        assert_eq!(query.resolve(&snapshot), Some(91.0));

        let query = MetricQuery::parse("system.memory.free").unwrap();
        assert_eq!(query.resolve(&snapshot), None);

        let query = MetricQuery::parse("system.memory").unwrap();
        assert_eq!(query.resolve(&snapshot), None);
    }

    #[test]
    fn test_resolve_label_selector_in_record_array() {
        let snapshot = json!({
            "prometheus": {
                "series": [
                    { "name": "http_errors", "value": 3, "labels": { "service": "api", "code": 500 } },
                    { "name": "http_errors", "value": 12, "labels": { "service": "web", "code": 500 } }
                ]
            }
        });

        let query = MetricQuery::parse(r#"http_errors{service="web",code="500"}"#).unwrap();
        assert_eq!(query.resolve(&snapshot), Some(12.0));

        let query = MetricQuery::parse(r#"http_errors{service="db"}"#).unwrap();
        assert_eq!(query.resolve(&snapshot), None);
    }

    #[test]
    fn test_resolve_label_selector_direct_key() {
        let snapshot = json!({
            "node_load": [
                { "value": 0.4, "labels": { "host": "a" } },
                { "value": 2.5, "labels": { "host": "b" } }
            ],
            "queue_depth": { "value": 17, "labels": { "queue": "billing" } }
        });

        let query = MetricQuery::parse(r#"node_load{host="b"}"#).unwrap();
        assert_eq!(query.resolve(&snapshot), Some(2.5));

        let query = MetricQuery::parse(r#"queue_depth{queue="billing"}"#).unwrap();
        assert_eq!(query.resolve(&snapshot), Some(17.0));

        let query = MetricQuery::parse(r#"queue_depth{queue="orders"}"#).unwrap();
        assert_eq!(query.resolve(&snapshot), None);
    }

    #[test]
    fn test_query_round_trips_through_serde() {
        let query: MetricQuery = serde_json::from_value(json!("cpu{mode=\"user\"}")).unwrap();
        assert_eq!(serde_json::to_value(&query).unwrap(), json!("cpu{mode=\"user\"}"));

        let invalid: Result<MetricQuery, _> = serde_json::from_value(json!("cpu{mode"));
        assert!(invalid.is_err());
    }
}
