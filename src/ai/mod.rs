pub mod analyzer;
pub mod enrichment;
pub mod http;

pub use analyzer::{
    AiAnalyzer, AlertPattern, AnalyzerError, Anomaly, AnomalyExplanation, AnomalyOptions, Correlation,
    Correlations, NullAnalyzer, PatternAnalysis, Recommendation, Recommendations,
};
pub use enrichment::{EnrichmentPipeline, EnrichmentSettings, PatternJob, PatternSchedule};
pub use http::HttpAnalyzer;
