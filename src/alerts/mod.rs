//! Alert lifecycle: rule evaluation, active/historical alert state and the
//! typed events published when alerts change.

pub mod evaluator;
pub mod events;
pub mod models;
pub mod store;

pub use evaluator::{EvaluationError, EvaluationReport, RuleEvaluator, RuleOutcome, AUTO_RESOLVE_REASON};
pub use events::{AlertEvent, EventBus};
pub use models::{Alert, AlertStatus, MetricSnapshot, RESOURCE_TYPE_LABEL};
pub use store::{AlertStore, AnomalyOutcome, CreateOutcome, DEFAULT_ANOMALY_LIMIT, DEFAULT_HISTORY_LIMIT, SUPERSEDED_REASON};
