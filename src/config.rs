use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::ai::{EnrichmentSettings, PatternSchedule};
use crate::alerts::{DEFAULT_ANOMALY_LIMIT, DEFAULT_HISTORY_LIMIT};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_channels_path")]
    pub channels_path: PathBuf,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Active anomaly alerts kept per rule before the oldest is superseded
    #[serde(default = "default_anomaly_limit")]
    pub anomaly_limit: usize,
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("config/alert-rules.json")
}

fn default_channels_path() -> PathBuf {
    PathBuf::from("config/notification-channels.json")
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_event_buffer() -> usize {
    1024
}

fn default_anomaly_limit() -> usize {
    DEFAULT_ANOMALY_LIMIT
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            channels_path: default_channels_path(),
            history_limit: default_history_limit(),
            event_buffer: default_event_buffer(),
            anomaly_limit: default_anomaly_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ai_history_window")]
    pub history_window: usize,
}

fn default_ai_endpoint() -> String {
    "http://localhost:8000/api/ai".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    15
}

fn default_ai_history_window() -> usize {
    20
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_ai_endpoint(),
            api_key: None,
            model: None,
            timeout_secs: default_ai_timeout_secs(),
            history_window: default_ai_history_window(),
        }
    }
}

impl AiConfig {
    pub fn enrichment_settings(&self) -> EnrichmentSettings {
        EnrichmentSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            history_window: self.history_window,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatternsConfig {
    #[serde(default = "default_patterns_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_patterns_history_window")]
    pub history_window: usize,
    #[serde(default = "default_min_history")]
    pub min_history: usize,
}

fn default_patterns_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_startup_delay_secs() -> u64 {
    60
}

fn default_patterns_history_window() -> usize {
    100
}

fn default_min_history() -> usize {
    10
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            enabled: default_patterns_enabled(),
            interval_secs: default_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            history_window: default_patterns_history_window(),
            min_history: default_min_history(),
        }
    }
}

impl PatternsConfig {
    pub fn schedule(&self) -> PatternSchedule {
        PatternSchedule {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            window: self.history_window,
            min_history: self.min_history,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    #[serde(default = "default_max_metrics_bytes")]
    pub max_metrics_bytes: usize,
}

fn default_client_buffer() -> usize {
    256
}

fn default_max_metrics_bytes() -> usize {
    65536
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            client_buffer: default_client_buffer(),
            max_metrics_bytes: default_max_metrics_bytes(),
        }
    }
}

impl Config {
    /// Load `config.toml`. A missing file yields the defaults; a file that
    /// exists but cannot be parsed is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override analyzer settings from the environment
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AI_ANALYZER_URL") {
            self.ai.endpoint = url;
            self.ai.enabled = true;
        }
        if let Some(key) = lookup("AI_ANALYZER_KEY") {
            self.ai.api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("config.toml")).unwrap();

        assert_eq!(config.server.http_port, 3001);
        assert_eq!(config.alerting.history_limit, 1000);
        assert_eq!(config.alerting.anomaly_limit, 50);
        assert_eq!(config.patterns.interval_secs, 3600);
        assert_eq!(config.realtime.max_metrics_bytes, 65536);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
http_port = 8080

[ai]
enabled = true
timeout_secs = 5

[patterns]
min_history = 3
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert!(config.ai.enabled);
        assert_eq!(config.ai.enrichment_settings().timeout, Duration::from_secs(5));
        assert_eq!(config.ai.history_window, 20);
        assert_eq!(config.patterns.schedule().min_history, 3);
        assert_eq!(config.patterns.schedule().interval, Duration::from_secs(3600));
        assert_eq!(config.realtime.client_buffer, 256);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nhttp_port = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "AI_ANALYZER_URL" => Some("http://analyzer:9000".to_string()),
            "AI_ANALYZER_KEY" => Some("secret".to_string()),
            _ => None,
        });

        assert!(config.ai.enabled);
        assert_eq!(config.ai.endpoint, "http://analyzer:9000");
        assert_eq!(config.ai.api_key.as_deref(), Some("secret"));
    }
}
