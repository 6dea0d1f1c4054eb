//! Built-in rule and channel sets used when the configured files are
//! missing or unreadable.

use serde_json::{json, Value};

pub fn default_rules() -> Value {
    json!({
        "rules": [
            {
                "id": "cpu_high",
                "name": "High CPU usage",
                "description": "CPU usage above 80%",
                "type": "threshold",
                "source": "all",
                "query": "system_cpu_usage",
                "condition": ">",
                "threshold": 80,
                "severity": "warning",
                "labels": { "category": "system" },
                "annotations": { "summary": "CPU usage is above 80%" }
            },
            {
                "id": "memory_high",
                "name": "High memory usage",
                "description": "Memory usage above 90%",
                "type": "threshold",
                "source": "all",
                "query": "system_memory_usage",
                "condition": ">",
                "threshold": 90,
                "severity": "critical",
                "labels": { "category": "system" },
                "annotations": { "summary": "Memory usage is above 90%" }
            },
            {
                "id": "disk_space_low",
                "name": "Low disk space",
                "description": "Free disk space below 10%",
                "type": "threshold",
                "source": "all",
                "query": "system.disk.free_percent",
                "condition": "<",
                "threshold": 10,
                "severity": "error",
                "labels": { "category": "storage" },
                "annotations": { "summary": "Less than 10% disk space left" }
            },
            {
                "id": "general_anomaly",
                "name": "AI detected anomaly",
                "description": "Anomalies reported by the AI analyzer",
                "type": "ai_anomaly",
                "source": "all",
                "resourceType": "general",
                "minSeverity": "warning",
                "severity": "warning",
                "enabled": false
            }
        ]
    })
}

pub fn default_channels() -> Value {
    json!({
        "channels": [
            { "id": "console", "name": "Console", "type": "console", "enabled": true },
            { "id": "websocket", "name": "Dashboard", "type": "websocket", "enabled": true }
        ]
    })
}
