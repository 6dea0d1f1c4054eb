//! Best-effort AI enrichment of alerts and scheduled pattern analysis.
//!
//! Every analyzer call goes through [`EnrichmentPipeline::guarded`], which
//! bounds it by a timeout and turns any failure into the neutral result, so
//! alerting keeps working without AI context.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::analyzer::{
    AiAnalyzer, AnalyzerError, AnomalyExplanation, AnomalyOptions, Correlations, PatternAnalysis,
    Recommendations,
};
use crate::alerts::{Alert, AlertEvent, AlertStore, EventBus, RESOURCE_TYPE_LABEL};
use crate::notifications::FeedbackType;

pub const RECOMMENDATIONS_KEY: &str = "aiRecommendations";
pub const CORRELATIONS_KEY: &str = "aiCorrelations";
pub const EXPLANATION_KEY: &str = "aiExplanation";
pub const ANOMALIES_KEY: &str = "aiAnomalies";
pub const ENRICHED_AT_KEY: &str = "enrichedAt";

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub timeout: Duration,
    /// Number of recent history entries sent along with a single alert
    pub history_window: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            history_window: 20,
        }
    }
}

pub struct EnrichmentPipeline {
    analyzer: Arc<dyn AiAnalyzer>,
    store: Arc<AlertStore>,
    bus: Arc<EventBus>,
    settings: EnrichmentSettings,
}

impl EnrichmentPipeline {
    pub fn new(
        analyzer: Arc<dyn AiAnalyzer>,
        store: Arc<AlertStore>,
        bus: Arc<EventBus>,
        settings: EnrichmentSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            analyzer,
            store,
            bus,
            settings,
        })
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> T
    where
        T: Default,
        F: Future<Output = Result<T, AnalyzerError>>,
    {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(operation, error = %e, "AI analysis failed, continuing without it");
                T::default()
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout_secs = self.settings.timeout.as_secs(),
                    "AI analysis timed out, continuing without it"
                );
                T::default()
            }
        }
    }

    pub async fn explain_anomaly(&self, metrics: &Value, resource_type: Option<&str>) -> AnomalyExplanation {
        let options = AnomalyOptions {
            resource_type: resource_type.map(str::to_string),
        };
        self.guarded("explain_anomaly", self.analyzer.explain_anomaly(metrics, &options))
            .await
    }

    pub async fn generate_recommendations(&self, alert: &Alert) -> Recommendations {
        let history = self.store.recent_history(self.settings.history_window).await;
        self.guarded(
            "generate_recommendations",
            self.analyzer.generate_recommendations(alert, &history, &alert.metrics),
        )
        .await
    }

    pub async fn analyze_correlations(&self, alert: &Alert) -> Correlations {
        let history = self.store.recent_history(self.settings.history_window).await;
        self.guarded(
            "analyze_correlations",
            self.analyzer.analyze_correlations(alert, &alert.metrics, &history),
        )
        .await
    }

    pub async fn analyze_patterns(&self, history: &[Alert]) -> PatternAnalysis {
        self.guarded("analyze_alert_patterns", self.analyzer.analyze_alert_patterns(history))
            .await
    }

    /// Attach recommendations and correlations to a freshly created alert
    pub async fn enrich_alert(&self, alert: &Alert) -> Option<Alert> {
        let (recommendations, correlations) =
            tokio::join!(self.generate_recommendations(alert), self.analyze_correlations(alert));

        let mut fields = BTreeMap::new();
        if !recommendations.recommendations.is_empty() {
            insert_json(&mut fields, RECOMMENDATIONS_KEY, &recommendations.recommendations);
        }
        if !correlations.correlations.is_empty() {
            insert_json(&mut fields, CORRELATIONS_KEY, &correlations.correlations);
        }
        self.apply(alert, fields).await
    }

    /// Enrichment requested by an `ai_feedback` channel
    pub async fn apply_feedback(&self, alert: &Alert, feedback: FeedbackType) -> Option<Alert> {
        let mut fields = BTreeMap::new();
        match feedback {
            FeedbackType::Explanation => {
                let resource_type = alert.labels.get(RESOURCE_TYPE_LABEL).map(String::as_str);
                let explained = self.explain_anomaly(&alert.metrics, resource_type).await;
                if !explained.explanation.is_empty() {
                    fields.insert(EXPLANATION_KEY.to_string(), Value::String(explained.explanation));
                }
                if !explained.anomalies.is_empty() {
                    insert_json(&mut fields, ANOMALIES_KEY, &explained.anomalies);
                }
            }
            FeedbackType::Recommendation => {
                let recommendations = self.generate_recommendations(alert).await;
                if !recommendations.recommendations.is_empty() {
                    insert_json(&mut fields, RECOMMENDATIONS_KEY, &recommendations.recommendations);
                }
            }
            FeedbackType::Correlation => {
                let correlations = self.analyze_correlations(alert).await;
                if !correlations.correlations.is_empty() {
                    insert_json(&mut fields, CORRELATIONS_KEY, &correlations.correlations);
                }
            }
        }
        self.apply(alert, fields).await
    }

    async fn apply(&self, alert: &Alert, mut fields: BTreeMap<String, Value>) -> Option<Alert> {
        if fields.is_empty() {
            debug!(alert_id = %alert.id, "No AI context to attach");
            return None;
        }
        fields.insert(ENRICHED_AT_KEY.to_string(), Value::String(Utc::now().to_rfc3339()));

        // The alert may have resolved while the analyzer was working
        let Some(updated) = self.store.merge_annotations(&alert.id, fields).await else {
            debug!(alert_id = %alert.id, "Alert no longer active, dropping enrichment");
            return None;
        };
        info!(alert_id = %updated.id, rule_id = %updated.rule_id, "Alert enriched with AI context");
        self.bus.publish(AlertEvent::Updated(updated.clone()));
        Some(updated)
    }

    pub fn spawn_enrichment(self: &Arc<Self>, alert: Alert) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.enrich_alert(&alert).await;
        })
    }

    pub fn spawn_feedback(self: &Arc<Self>, alert: Alert, feedback: FeedbackType) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.apply_feedback(&alert, feedback).await;
        })
    }

    /// Analyze the last `window` history entries and publish the result.
    /// Individual alerts are never modified.
    pub async fn run_pattern_analysis(&self, window: usize) -> Option<PatternAnalysis> {
        let history = self.store.get_history(window).await;
        if history.is_empty() {
            debug!("No alert history to analyze");
            return None;
        }

        let analysis = self.analyze_patterns(&history).await;
        if analysis.is_empty() {
            debug!(entries = history.len(), "Pattern analysis found nothing");
            return None;
        }

        info!(
            entries = history.len(),
            patterns = analysis.patterns.len(),
            insights = analysis.insights.len(),
            "Alert pattern analysis complete"
        );
        self.bus.publish(AlertEvent::PatternsDetected(analysis.clone()));
        Some(analysis)
    }
}

fn insert_json<T: Serialize>(fields: &mut BTreeMap<String, Value>, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(json) => {
            fields.insert(key.to_string(), json);
        }
        Err(e) => warn!(key, error = %e, "Could not serialize AI result"),
    }
}

#[derive(Debug, Clone)]
pub struct PatternSchedule {
    pub interval: Duration,
    pub startup_delay: Duration,
    pub window: usize,
    /// History entries required before the startup run happens
    pub min_history: usize,
}

impl Default for PatternSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            startup_delay: Duration::from_secs(60),
            window: 100,
            min_history: 10,
        }
    }
}

/// Background task running pattern analysis once after startup and then on
/// a fixed interval until stopped.
pub struct PatternJob {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PatternJob {
    pub fn start(pipeline: Arc<EnrichmentPipeline>, schedule: PatternSchedule) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let startup = tokio::time::sleep(schedule.startup_delay);
            tokio::pin!(startup);
            let mut startup_pending = true;

            let mut ticker = interval_at(Instant::now() + schedule.interval, schedule.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = schedule.interval.as_secs(),
                window = schedule.window,
                "Pattern analysis job started"
            );

            loop {
                tokio::select! {
                    _ = &mut startup, if startup_pending => {
                        startup_pending = false;
                        let available = pipeline.store().history_len().await;
                        if available >= schedule.min_history {
                            pipeline.run_pattern_analysis(schedule.window).await;
                        } else {
                            debug!(available, required = schedule.min_history, "Skipping startup pattern analysis");
                        }
                    }
                    _ = ticker.tick() => {
                        pipeline.run_pattern_analysis(schedule.window).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Pattern analysis job shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop both timers and wait for the task to exit
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
