use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::events::{AlertEvent, EventBus};
use super::models::MetricSnapshot;
use super::store::{AlertStore, CreateOutcome};
use crate::ai::EnrichmentPipeline;
use crate::rules::{Comparison, MetricQuery, Rule, RuleKind, RuleStore, Severity};

/// Reason recorded when a threshold alert clears on its own
pub const AUTO_RESOLVE_REASON: &str = "condition no longer met";

/// Resource type meaning "the whole snapshot"
const GENERAL_RESOURCE: &str = "general";

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Rule '{0}' has a non-finite threshold")]
    NonFiniteThreshold(String),
    #[error("Rule '{rule_id}' needs an object snapshot to select '{resource_type}' metrics")]
    NonObjectSnapshot { rule_id: String, resource_type: String },
}

/// What a single rule did during one evaluation cycle
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Fired(usize),
    Resolved,
    Unchanged,
    /// The metric could not be resolved to a number
    Skipped,
    /// Rule type without an evaluation algorithm
    NotEvaluated,
    /// Handed to background anomaly detection
    Deferred,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub source: String,
    pub evaluated: usize,
    pub fired: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
    /// ai_anomaly rules still waiting on the analyzer
    pub deferred: usize,
}

/// One ai_anomaly rule with its metrics subset already selected
struct AnomalyCheck {
    rule: Rule,
    resource_type: Option<String>,
    min_severity: Severity,
    subset: Value,
}

/// Turns analyzer findings into anomaly alerts. Cloned into the background
/// task so slow analyzer calls stay off the threshold path.
#[derive(Clone)]
struct AnomalyDetector {
    alerts: Arc<AlertStore>,
    enrichment: Arc<EnrichmentPipeline>,
    bus: Arc<EventBus>,
}

impl AnomalyDetector {
    async fn detect(&self, check: &AnomalyCheck, source: &str) -> usize {
        let rule = &check.rule;
        let explained = self
            .enrichment
            .explain_anomaly(&check.subset, check.resource_type.as_deref())
            .await;

        let mut fired = 0;
        for anomaly in explained.anomalies.iter().filter(|a| a.severity >= check.min_severity) {
            let outcome = self
                .alerts
                .create_anomaly(rule, source, anomaly, check.subset.clone())
                .await;
            let alert = outcome.alert;
            info!(
                alert_id = %alert.id,
                rule_id = %rule.id,
                severity = %alert.severity,
                "Anomaly alert firing"
            );
            if let Some(superseded) = outcome.superseded {
                debug!(alert_id = %superseded.id, rule_id = %rule.id, "Anomaly alert superseded");
                self.bus.publish(AlertEvent::Resolved(superseded));
            }
            self.bus.publish(AlertEvent::Created(alert.clone()));
            self.enrichment.spawn_enrichment(alert);
            fired += 1;
        }

        let ignored = explained.anomalies.len() - fired;
        if ignored > 0 {
            debug!(rule_id = %rule.id, ignored, min_severity = %check.min_severity, "Anomalies below minimum severity");
        }
        fired
    }
}

pub struct RuleEvaluator {
    rules: Arc<RuleStore>,
    alerts: Arc<AlertStore>,
    bus: Arc<EventBus>,
    detector: AnomalyDetector,
}

impl RuleEvaluator {
    pub fn new(
        rules: Arc<RuleStore>,
        alerts: Arc<AlertStore>,
        enrichment: Arc<EnrichmentPipeline>,
        bus: Arc<EventBus>,
    ) -> Self {
        let detector = AnomalyDetector {
            alerts: alerts.clone(),
            enrichment,
            bus: bus.clone(),
        };
        Self {
            rules,
            alerts,
            bus,
            detector,
        }
    }

    /// Run every enabled rule matching the snapshot source. A failing rule
    /// is logged and counted; the remaining rules still run. ai_anomaly
    /// rules finish in the background after this returns.
    pub async fn evaluate(&self, snapshot: &MetricSnapshot) -> EvaluationReport {
        self.evaluate_snapshot(snapshot).await.0
    }

    /// Like [`evaluate`](Self::evaluate), also returning the background
    /// anomaly task, which yields the number of anomaly alerts it fired
    async fn evaluate_snapshot(&self, snapshot: &MetricSnapshot) -> (EvaluationReport, Option<JoinHandle<usize>>) {
        let rules = self.rules.rules_for_source(&snapshot.source).await;
        let mut report = EvaluationReport {
            source: snapshot.source.clone(),
            evaluated: rules.len(),
            ..Default::default()
        };
        let mut checks = Vec::new();

        for rule in rules {
            let outcome = match anomaly_check(&rule, &snapshot.metrics) {
                Some(Ok(check)) => {
                    checks.push(check);
                    Ok(RuleOutcome::Deferred)
                }
                Some(Err(e)) => Err(e),
                None => self.evaluate_rule(&rule, snapshot).await,
            };
            match outcome {
                Ok(RuleOutcome::Fired(count)) => report.fired += count,
                Ok(RuleOutcome::Resolved) => report.resolved += 1,
                Ok(RuleOutcome::Skipped) | Ok(RuleOutcome::NotEvaluated) => report.skipped += 1,
                Ok(RuleOutcome::Deferred) => report.deferred += 1,
                Ok(RuleOutcome::Unchanged) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(rule_id = %rule.id, error = %e, "Rule evaluation failed");
                }
            }
        }

        if report.fired > 0 || report.resolved > 0 || report.failed > 0 {
            info!(
                source = %report.source,
                evaluated = report.evaluated,
                fired = report.fired,
                resolved = report.resolved,
                failed = report.failed,
                "Snapshot evaluated"
            );
        }

        let handle = (!checks.is_empty()).then(|| self.spawn_detection(snapshot.source.clone(), checks));
        (report, handle)
    }

    fn spawn_detection(&self, source: String, checks: Vec<AnomalyCheck>) -> JoinHandle<usize> {
        let detector = self.detector.clone();
        tokio::spawn(async move {
            let fired = join_all(checks.iter().map(|check| detector.detect(check, &source))).await;
            fired.into_iter().sum()
        })
    }

    /// Evaluate a single rule, awaiting the analyzer for ai_anomaly rules
    pub async fn evaluate_rule(
        &self,
        rule: &Rule,
        snapshot: &MetricSnapshot,
    ) -> Result<RuleOutcome, EvaluationError> {
        match &rule.kind {
            RuleKind::Threshold {
                query,
                condition,
                threshold,
            } => {
                self.evaluate_threshold(rule, snapshot, query, *condition, *threshold)
                    .await
            }
            RuleKind::RateOfChange { .. } => {
                debug!(rule_id = %rule.id, "rate_of_change rules are not evaluated");
                Ok(RuleOutcome::NotEvaluated)
            }
            RuleKind::AiAnomaly { .. } => match anomaly_check(rule, &snapshot.metrics) {
                Some(check) => {
                    let fired = self.detector.detect(&check?, &snapshot.source).await;
                    Ok(RuleOutcome::Fired(fired))
                }
                None => Ok(RuleOutcome::NotEvaluated),
            },
        }
    }

    async fn evaluate_threshold(
        &self,
        rule: &Rule,
        snapshot: &MetricSnapshot,
        query: &MetricQuery,
        condition: Comparison,
        threshold: f64,
    ) -> Result<RuleOutcome, EvaluationError> {
        if !threshold.is_finite() {
            return Err(EvaluationError::NonFiniteThreshold(rule.id.clone()));
        }

        let Some(value) = query.resolve(&snapshot.metrics) else {
            debug!(rule_id = %rule.id, query = %query, "Metric not resolved, skipping rule");
            return Ok(RuleOutcome::Skipped);
        };

        if condition.holds(value, threshold) {
            let mut subset = Map::new();
            subset.insert(query.to_string(), Value::from(value));
            match self
                .alerts
                .create(rule, &snapshot.source, value, Value::Object(subset))
                .await
            {
                CreateOutcome::Created(alert) => {
                    info!(
                        alert_id = %alert.id,
                        rule_id = %rule.id,
                        value,
                        threshold,
                        condition = condition.symbol(),
                        "Alert firing"
                    );
                    self.bus.publish(AlertEvent::Created(alert));
                    Ok(RuleOutcome::Fired(1))
                }
                CreateOutcome::Existing(_) => Ok(RuleOutcome::Unchanged),
            }
        } else {
            match self.alerts.resolve_rule(&rule.id, AUTO_RESOLVE_REASON).await {
                Some(alert) => {
                    info!(alert_id = %alert.id, rule_id = %rule.id, value, "Alert resolved");
                    self.bus.publish(AlertEvent::Resolved(alert));
                    Ok(RuleOutcome::Resolved)
                }
                None => Ok(RuleOutcome::Unchanged),
            }
        }
    }
}

/// `None` for rules that are not ai_anomaly
fn anomaly_check(rule: &Rule, metrics: &Value) -> Option<Result<AnomalyCheck, EvaluationError>> {
    let RuleKind::AiAnomaly {
        resource_type,
        min_severity,
    } = &rule.kind
    else {
        return None;
    };
    Some(
        select_resource_metrics(rule, metrics, resource_type.as_deref()).map(|subset| AnomalyCheck {
            rule: rule.clone(),
            resource_type: resource_type.clone(),
            min_severity: *min_severity,
            subset,
        }),
    )
}

/// Top-level metrics whose key contains the resource type, or the whole
/// snapshot for an absent or general resource type.
fn select_resource_metrics(
    rule: &Rule,
    metrics: &Value,
    resource_type: Option<&str>,
) -> Result<Value, EvaluationError> {
    let resource_type = match resource_type {
        Some(r) if !r.is_empty() && !r.eq_ignore_ascii_case(GENERAL_RESOURCE) => r.to_lowercase(),
        _ => return Ok(metrics.clone()),
    };

    let Some(map) = metrics.as_object() else {
        return Err(EvaluationError::NonObjectSnapshot {
            rule_id: rule.id.clone(),
            resource_type,
        });
    };

    let subset: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.to_lowercase().contains(&resource_type))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(Value::Object(subset))
}
