use serde_json::{json, Value};
use tracing::warn;

use crate::alerts::Alert;

/// Serialization-safe projection of an alert for network broadcast. The
/// `metrics` subset is replaced by an error marker when it cannot be encoded
/// or is larger than `max_metrics_bytes`.
pub fn safe_alert(alert: &Alert, max_metrics_bytes: usize) -> Value {
    let metrics = match serde_json::to_string(&alert.metrics) {
        Ok(encoded) if encoded.len() <= max_metrics_bytes => alert.metrics.clone(),
        Ok(encoded) => json!({
            "error": "metrics too large to broadcast",
            "bytes": encoded.len(),
        }),
        Err(e) => json!({ "error": format!("metrics not serializable: {}", e) }),
    };

    let mut copy = alert.clone();
    copy.metrics = Value::Null;
    match serde_json::to_value(&copy) {
        Ok(mut value) => {
            value["metrics"] = metrics;
            value
        }
        Err(e) => {
            warn!(alert_id = %alert.id, error = %e, "Alert not serializable, sending summary only");
            json!({
                "id": alert.id,
                "ruleId": alert.rule_id,
                "ruleName": alert.rule_name,
                "severity": alert.severity,
                "status": alert.status,
                "metrics": { "error": "alert not serializable" },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    fn alert(metrics: Value) -> Alert {
        let rule: Rule = serde_json::from_value(json!({
            "id": "cpu_high", "name": "High CPU", "type": "threshold",
            "query": "system_cpu_usage", "condition": ">", "threshold": 80
        }))
        .unwrap();
        Alert::from_rule(&rule, "prometheus", 85.0, metrics)
    }

    #[test]
    fn test_safe_copy_keeps_small_metrics() {
        let alert = alert(json!({ "system_cpu_usage": 85 }));
        let copy = safe_alert(&alert, 1024);

        assert_eq!(copy["id"], json!(alert.id));
        assert_eq!(copy["ruleId"], json!("cpu_high"));
        assert_eq!(copy["status"], json!("firing"));
        assert_eq!(copy["metrics"], json!({ "system_cpu_usage": 85 }));
    }

    #[test]
    fn test_safe_copy_replaces_oversized_metrics() {
        let big: Vec<u32> = (0..500).collect();
        let alert = alert(json!({ "samples": big }));
        let copy = safe_alert(&alert, 64);

        assert_eq!(copy["metrics"]["error"], json!("metrics too large to broadcast"));
        assert!(copy["metrics"]["bytes"].as_u64().unwrap() > 64);
        assert_eq!(copy["ruleName"], json!("High CPU"));
    }
}
