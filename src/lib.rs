//! Metrics-driven alerting engine: rule evaluation, deduplicated alert
//! state, AI enrichment, notification fan-out and realtime push.

pub mod ai;
pub mod alerts;
pub mod api;
pub mod config;
pub mod engine;
pub mod notifications;
pub mod realtime;
pub mod rules;

pub use config::Config;
pub use engine::AlertingEngine;
