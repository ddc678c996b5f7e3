//! testpulse core
//!
//! Longitudinal test-health metrics: walks a repository's revision history,
//! extracts testing metrics per revision, buckets them over time, classifies
//! test flakiness and assembles a chart-ready report.
//!
//! - `source`: local and remote revision sources with read-only trees
//! - `extract`: the pluggable extractor registry and built-in extractors
//! - `aggregate`: time bucketing and merge rules
//! - `flakiness`: per-test stability verdicts
//! - `report`: the report model and JSON persistence
//! - `pipeline`: the bounded-concurrency run tying it together

pub mod aggregate;
pub mod config;
pub mod domain;
pub mod extract;
pub mod flakiness;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod source;
pub mod telemetry;

pub use aggregate::{aggregate, rebucket, AggregatedValue, Bucket, BucketKey, Granularity};
pub use config::AnalyzerConfig;
pub use domain::{
    ExtractError, MetricSample, MetricValue, PulseError, ReportError, Result, RevisionRef,
    SourceError, TestOutcome, TestOutcomeRecord,
};
pub use extract::{
    ChartKind, Extraction, Extractor, ExtractorRegistry, MergeRule, MetricCatalog,
    MetricDescriptor,
};
pub use flakiness::{classify, Classification, FlakinessSummary, FlakinessVerdict};
pub use pipeline::Analyzer;
pub use report::{
    read_report_json, render_summary_text, write_report_json, Chart, Dataset, Report,
    ReportBuilder, RunSummary, SkipKind, SkipRecord,
};
pub use retry::{RateLimitState, RetryPolicy};
pub use source::{
    open_source, RepositoryStats, RevisionSource, RevisionTree, TargetDescriptor,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
