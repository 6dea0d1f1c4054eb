use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::analyzer::{
    AiAnalyzer, AnalyzerError, AnomalyExplanation, AnomalyOptions, Correlations, PatternAnalysis,
    Recommendations,
};
use crate::alerts::Alert;

/// Analyzer backed by a JSON-over-HTTP analysis service. Each method posts
/// to its own path below the configured endpoint.
pub struct HttpAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: u64,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: None,
            timeout_secs,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, mut body: Value) -> Result<T, AnalyzerError> {
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }

        let url = format!("{}/{}", self.endpoint, path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalyzerError::Timeout(self.timeout_secs)
            } else {
                AnalyzerError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        debug!("Analyzer response from {}: {} bytes", path, text.len());
        serde_json::from_str(&text).map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AiAnalyzer for HttpAnalyzer {
    async fn explain_anomaly(
        &self,
        metrics: &Value,
        options: &AnomalyOptions,
    ) -> Result<AnomalyExplanation, AnalyzerError> {
        self.post(
            "explain-anomaly",
            json!({ "metrics": metrics, "resourceType": options.resource_type }),
        )
        .await
    }

    async fn generate_recommendations(
        &self,
        alert: &Alert,
        recent_history: &[Alert],
        metrics: &Value,
    ) -> Result<Recommendations, AnalyzerError> {
        self.post(
            "recommendations",
            json!({ "alert": alert, "recentHistory": recent_history, "metrics": metrics }),
        )
        .await
    }

    async fn analyze_correlations(
        &self,
        alert: &Alert,
        metrics: &Value,
        recent_history: &[Alert],
    ) -> Result<Correlations, AnalyzerError> {
        self.post(
            "correlations",
            json!({ "alert": alert, "metrics": metrics, "recentHistory": recent_history }),
        )
        .await
    }

    async fn analyze_alert_patterns(&self, history: &[Alert]) -> Result<PatternAnalysis, AnalyzerError> {
        self.post("patterns", json!({ "history": history })).await
    }
}
