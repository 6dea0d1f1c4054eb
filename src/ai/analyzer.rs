use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::Alert;
use crate::rules::Severity;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Analyzer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Analyzer returned status {0}")]
    Status(u16),
    #[error("Invalid analyzer response: {0}")]
    InvalidResponse(String),
    #[error("Analyzer timed out after {0}s")]
    Timeout(u64),
    #[error("Analyzer unavailable: {0}")]
    Unavailable(String),
}

/// Options for [`AiAnalyzer::explain_anomaly`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyExplanation {
    pub anomalies: Vec<Anomaly>,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendations {
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Correlation {
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<f64>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Correlations {
    pub correlations: Vec<Correlation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertPattern {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
    pub rule_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternAnalysis {
    pub patterns: Vec<AlertPattern>,
    pub insights: Vec<String>,
}

impl PatternAnalysis {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.insights.is_empty()
    }
}

/// Request/response contract of the external AI-backed analysis service
#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    async fn explain_anomaly(
        &self,
        metrics: &Value,
        options: &AnomalyOptions,
    ) -> Result<AnomalyExplanation, AnalyzerError>;

    async fn generate_recommendations(
        &self,
        alert: &Alert,
        recent_history: &[Alert],
        metrics: &Value,
    ) -> Result<Recommendations, AnalyzerError>;

    async fn analyze_correlations(
        &self,
        alert: &Alert,
        metrics: &Value,
        recent_history: &[Alert],
    ) -> Result<Correlations, AnalyzerError>;

    async fn analyze_alert_patterns(&self, history: &[Alert]) -> Result<PatternAnalysis, AnalyzerError>;
}

/// Analyzer used when no AI backend is configured; every call returns an
/// empty result.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

#[async_trait]
impl AiAnalyzer for NullAnalyzer {
    async fn explain_anomaly(
        &self,
        _metrics: &Value,
        _options: &AnomalyOptions,
    ) -> Result<AnomalyExplanation, AnalyzerError> {
        Ok(AnomalyExplanation::default())
    }

    async fn generate_recommendations(
        &self,
        _alert: &Alert,
        _recent_history: &[Alert],
        _metrics: &Value,
    ) -> Result<Recommendations, AnalyzerError> {
        Ok(Recommendations::default())
    }

    async fn analyze_correlations(
        &self,
        _alert: &Alert,
        _metrics: &Value,
        _recent_history: &[Alert],
    ) -> Result<Correlations, AnalyzerError> {
        Ok(Correlations::default())
    }

    async fn analyze_alert_patterns(&self, _history: &[Alert]) -> Result<PatternAnalysis, AnalyzerError> {
        Ok(PatternAnalysis::default())
    }
}
