use serde_json::Value;

use super::channels::MessageTemplates;
use crate::alerts::Alert;

pub const DEFAULT_SUBJECT: &str = "[{{severity}}] {{ruleName}} is {{status}}";

pub const DEFAULT_BODY: &str = "Alert: {{ruleName}}\n\
Severity: {{severity}}\n\
Status: {{status}}\n\
Source: {{source}}\n\
Value: {{value}}\n\
Started: {{startsAt}}\n\n\
{{summary}}";

/// Rendered subject and body for one alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Render a channel's templates, falling back to the defaults
pub fn render(templates: Option<&MessageTemplates>, alert: &Alert) -> RenderedMessage {
    let subject = templates
        .and_then(|t| t.subject.as_deref())
        .unwrap_or(DEFAULT_SUBJECT);
    let body = templates.and_then(|t| t.body.as_deref()).unwrap_or(DEFAULT_BODY);

    RenderedMessage {
        subject: render_template(subject, alert),
        body: render_template(body, alert),
    }
}

/// Replace `{{name}}` placeholders with alert fields. Unknown placeholders
/// render as empty strings and an unterminated `{{` is kept verbatim.
pub fn render_template(template: &str, alert: &Alert) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                out.push_str(&placeholder(after[..end].trim(), alert));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder(name: &str, alert: &Alert) -> String {
    match name {
        "id" => alert.id.clone(),
        "ruleId" => alert.rule_id.clone(),
        "ruleName" => alert.rule_name.clone(),
        "severity" => alert.severity.to_string(),
        "status" => status_str(alert).to_string(),
        "source" => alert.source.clone(),
        "value" => alert
            .value
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "n/a".to_string()),
        "summary" => alert.summary(),
        "startsAt" => alert.starts_at.to_rfc3339(),
        "explanation" => alert.explanation.clone().unwrap_or_default(),
        other => match other.strip_prefix("labels.") {
            Some(key) => alert.labels.get(key).cloned().unwrap_or_default(),
            None => match other.strip_prefix("annotations.") {
                Some(key) => alert
                    .annotations
                    .get(key)
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
                None => String::new(),
            },
        },
    }
}

fn status_str(alert: &Alert) -> &'static str {
    use crate::alerts::AlertStatus;
    match alert.status {
        AlertStatus::Firing => "firing",
        AlertStatus::Acknowledged => "acknowledged",
        AlertStatus::Resolved => "resolved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;
    use serde_json::json;

    fn alert() -> Alert {
        let rule: Rule = serde_json::from_value(json!({
            "id": "cpu_high", "name": "High CPU Usage", "type": "threshold",
            "severity": "critical", "query": "system_cpu_usage",
            "condition": ">", "threshold": 80,
            "labels": { "team": "infra" },
            "annotations": { "summary": "CPU above 80%" }
        }))
        .unwrap();
        Alert::from_rule(&rule, "node-1", 93.456, json!({}))
    }

    #[test]
    fn test_default_subject() {
        let rendered = render(None, &alert());
        assert_eq!(rendered.subject, "[critical] High CPU Usage is firing");
        assert!(rendered.body.contains("Value: 93.46"));
        assert!(rendered.body.contains("Source: node-1"));
        assert!(rendered.body.contains("CPU above 80%"));
    }

    #[test]
    fn test_custom_templates_and_labels() {
        let templates = MessageTemplates {
            subject: Some("{{ ruleId }} for {{labels.team}}".to_string()),
            body: Some("{{annotations.summary}}{{missing}}!".to_string()),
        };
        let rendered = render(Some(&templates), &alert());
        assert_eq!(rendered.subject, "cpu_high for infra");
        assert_eq!(rendered.body, "CPU above 80%!");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(render_template("value {{value", &alert()), "value {{value");
    }
}
