pub mod defaults;
pub mod models;
pub mod query;
pub mod store;

pub use models::{Comparison, Rule, RuleKind, Severity, ALL_SOURCES};
pub use query::{MetricQuery, QueryError};
pub use store::{RuleStore, StoreError};
