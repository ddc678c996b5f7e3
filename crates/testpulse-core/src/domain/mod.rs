//! Domain models for testpulse.
//!
//! Canonical definitions for the entities shared by every stage of a run:
//! - `RevisionRef`: an immutable, timestamped snapshot identifier
//! - `MetricSample`: one extractor measurement at one revision
//! - `TestOutcomeRecord`: one test's result at one revision

pub mod error;
pub mod revision;
pub mod sample;

pub use error::{
    ExtractError, ExtractResult, PulseError, ReportError, ReportResult, Result, SourceError,
    SourceResult,
};
pub use revision::RevisionRef;
pub use sample::{MetricSample, MetricValue, TestOutcome, TestOutcomeRecord, TEST_OUTCOME_METRIC};
