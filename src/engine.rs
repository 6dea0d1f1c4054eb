//! Wiring of the alerting components and their background tasks.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ai::{AiAnalyzer, EnrichmentPipeline, PatternJob, PatternSchedule};
use crate::alerts::{Alert, AlertEvent, AlertStore, EvaluationReport, EventBus, MetricSnapshot, RuleEvaluator};
use crate::config::Config;
use crate::notifications::{run_dispatch_loop, NotificationChannel, NotificationDispatcher, NotificationTransport};
use crate::realtime::RealtimeHub;
use crate::rules::{Rule, RuleStore, StoreError};

/// Reason recorded when an operator resolves an alert without giving one
pub const MANUAL_RESOLVE_REASON: &str = "manually resolved";

/// Reason recorded when the rule behind an active alert is deleted
pub const RULE_DELETED_REASON: &str = "rule deleted";

struct BackgroundTasks {
    dispatch_shutdown: mpsc::Sender<()>,
    dispatch_handle: JoinHandle<()>,
    pattern_job: Option<PatternJob>,
}

pub struct AlertingEngine {
    rules: Arc<RuleStore>,
    alerts: Arc<AlertStore>,
    bus: Arc<EventBus>,
    enrichment: Arc<EnrichmentPipeline>,
    evaluator: RuleEvaluator,
    hub: Arc<RealtimeHub>,
    dispatcher: Arc<NotificationDispatcher>,
    pattern_schedule: Option<PatternSchedule>,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl AlertingEngine {
    /// Load rules and channels from the configured files and build the
    /// engine. Fails only when the definitions cannot form a valid store.
    pub fn new(
        config: &Config,
        analyzer: Arc<dyn AiAnalyzer>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Result<Arc<Self>> {
        let rules = RuleStore::load(&config.alerting.rules_path, &config.alerting.channels_path)
            .context("loading alert rules and notification channels")?;
        Ok(Self::with_store(config, rules, analyzer, transport))
    }

    pub fn with_store(
        config: &Config,
        rules: Arc<RuleStore>,
        analyzer: Arc<dyn AiAnalyzer>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Arc<Self> {
        let alerts = AlertStore::with_limits(config.alerting.history_limit, config.alerting.anomaly_limit);
        let bus = EventBus::new(config.alerting.event_buffer);
        let enrichment = EnrichmentPipeline::new(
            analyzer,
            alerts.clone(),
            bus.clone(),
            config.ai.enrichment_settings(),
        );
        let evaluator = RuleEvaluator::new(rules.clone(), alerts.clone(), enrichment.clone(), bus.clone());
        let hub = RealtimeHub::new(
            alerts.clone(),
            config.realtime.client_buffer,
            config.realtime.max_metrics_bytes,
        );
        let dispatcher = NotificationDispatcher::new(rules.clone(), hub.clone(), enrichment.clone(), transport);
        let pattern_schedule = config.patterns.enabled.then(|| config.patterns.schedule());

        Arc::new(Self {
            rules,
            alerts,
            bus,
            enrichment,
            evaluator,
            hub,
            dispatcher,
            pattern_schedule,
            tasks: Mutex::new(None),
        })
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    /// Evaluate one metric snapshot against the rule set
    pub async fn ingest(&self, snapshot: MetricSnapshot) -> EvaluationReport {
        self.evaluator.evaluate(&snapshot).await
    }

    /// Start the dispatch loop and, if enabled, the pattern analysis job.
    /// Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!("Alerting engine already started");
            return;
        }

        let (dispatch_shutdown, shutdown_rx) = mpsc::channel(1);
        let dispatch_handle = tokio::spawn(run_dispatch_loop(
            self.dispatcher.clone(),
            self.bus.subscribe(),
            shutdown_rx,
        ));
        let pattern_job = self
            .pattern_schedule
            .clone()
            .map(|schedule| PatternJob::start(self.enrichment.clone(), schedule));

        info!(
            patterns = pattern_job.is_some(),
            "Alerting engine started"
        );
        *tasks = Some(BackgroundTasks {
            dispatch_shutdown,
            dispatch_handle,
            pattern_job,
        });
    }

    /// Stop background tasks and wait for them to exit
    pub async fn shutdown(&self) {
        let Some(mut tasks) = self.tasks.lock().await.take() else {
            return;
        };
        if let Some(job) = tasks.pattern_job.as_mut() {
            job.stop().await;
        }
        let _ = tasks.dispatch_shutdown.send(()).await;
        let _ = tasks.dispatch_handle.await;
        info!("Alerting engine stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    // ========== Alerts ==========

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.get_active().await
    }

    pub async fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.alerts.get_history(limit).await
    }

    pub async fn acknowledge(&self, alert_id: &str) -> Option<Alert> {
        let alert = self.alerts.acknowledge(alert_id).await?;
        info!(alert_id = %alert.id, rule_id = %alert.rule_id, "Alert acknowledged");
        self.bus.publish(AlertEvent::Updated(alert.clone()));
        Some(alert)
    }

    pub async fn resolve(&self, alert_id: &str, reason: Option<&str>) -> Option<Alert> {
        let reason = reason.unwrap_or(MANUAL_RESOLVE_REASON);
        let alert = self.alerts.resolve(alert_id, reason).await?;
        info!(alert_id = %alert.id, rule_id = %alert.rule_id, reason, "Alert resolved");
        self.bus.publish(AlertEvent::Resolved(alert.clone()));
        Some(alert)
    }

    // ========== Rules & channels ==========

    pub async fn add_rule(&self, rule: Rule) -> Result<Rule, StoreError> {
        let rule = self.rules.add_rule(rule).await?;
        info!(rule_id = %rule.id, rule_type = rule.type_name(), "Rule added");
        Ok(rule)
    }

    pub async fn update_rule(&self, id: &str, rule: Rule) -> Result<Rule, StoreError> {
        let rule = self.rules.update_rule(id, rule).await?;
        info!(rule_id = %rule.id, "Rule updated");
        Ok(rule)
    }

    /// Delete a rule and resolve the alert it keeps active, if any
    pub async fn delete_rule(&self, id: &str) -> Result<Rule, StoreError> {
        let rule = self.rules.delete_rule(id).await?;
        if let Some(alert) = self.alerts.resolve_rule(&rule.id, RULE_DELETED_REASON).await {
            self.bus.publish(AlertEvent::Resolved(alert));
        }
        info!(rule_id = %rule.id, "Rule deleted");
        Ok(rule)
    }

    pub async fn add_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError> {
        let channel = self.rules.add_channel(channel).await?;
        info!(channel_id = %channel.id, channel_type = channel.channel_type.as_str(), "Channel added");
        Ok(channel)
    }

    pub async fn update_channel(
        &self,
        id: &str,
        channel: NotificationChannel,
    ) -> Result<NotificationChannel, StoreError> {
        let channel = self.rules.update_channel(id, channel).await?;
        info!(channel_id = %channel.id, "Channel updated");
        Ok(channel)
    }

    pub async fn delete_channel(&self, id: &str) -> Result<NotificationChannel, StoreError> {
        let channel = self.rules.delete_channel(id).await?;
        info!(channel_id = %channel.id, "Channel deleted");
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::NullAnalyzer;
    use crate::notifications::LogTransport;
    use serde_json::json;

    fn engine() -> Arc<AlertingEngine> {
        let mut config = Config::default();
        config.patterns.enabled = false;
        let rules = RuleStore::with_defaults().unwrap();
        AlertingEngine::with_store(&config, rules, Arc::new(NullAnalyzer), Arc::new(LogTransport))
    }

    #[tokio::test]
    async fn test_acknowledge_publishes_update() {
        let engine = engine();
        let mut events = engine.bus().subscribe();

        engine
            .ingest(MetricSnapshot::new("node-1", json!({ "system_cpu_usage": 95 })))
            .await;
        assert!(matches!(events.recv().await.unwrap(), AlertEvent::Created(_)));

        let acknowledged = engine.acknowledge("cpu_high").await.unwrap();
        assert_eq!(acknowledged.status, crate::alerts::AlertStatus::Acknowledged);
        assert!(matches!(events.recv().await.unwrap(), AlertEvent::Updated(_)));
    }

    #[tokio::test]
    async fn test_delete_rule_resolves_its_alert() {
        let engine = engine();
        engine
            .ingest(MetricSnapshot::new("node-1", json!({ "system_cpu_usage": 95 })))
            .await;
        assert_eq!(engine.active_alerts().await.len(), 1);

        engine.delete_rule("cpu_high").await.unwrap();

        assert!(engine.active_alerts().await.is_empty());
        let history = engine.alert_history(10).await;
        assert_eq!(history.last().unwrap().resolution_reason.as_deref(), Some(RULE_DELETED_REASON));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = engine();
        engine.start().await;
        engine.start().await;
        assert!(engine.is_running().await);

        engine.shutdown().await;
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_manual_resolve_unknown_alert() {
        let engine = engine();
        assert!(engine.resolve("missing", None).await.is_none());
    }
}
