//! Structured observability hooks for the run lifecycle.
//!
//! - `run_span`: span tagging every event of a run with its `run_id`
//! - `emit_*`: one function per lifecycle event, so field names stay stable
//!   for log consumers

use tracing::{debug, info, warn};

/// Span tagging every event of a run with its `run_id`.
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span(&run_id)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("testpulse.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, target: &str, revisions: usize) {
    info!(event = "run.started", run_id = %run_id, target = %target, revisions = revisions);
}

pub fn emit_revision_extracted(revision_id: &str, samples: usize, skipped: usize) {
    debug!(
        event = "revision.extracted",
        revision = %revision_id,
        samples = samples,
        skipped = skipped,
    );
}

/// Extractor produced nothing for a revision, either by design or by failure.
pub fn emit_extractor_skipped(revision_id: &str, extractor: &str, reason: &str, failed: bool) {
    if failed {
        warn!(
            event = "extractor.failed",
            revision = %revision_id,
            extractor = %extractor,
            reason = %reason,
        );
    } else {
        debug!(
            event = "extractor.skipped",
            revision = %revision_id,
            extractor = %extractor,
            reason = %reason,
        );
    }
}

pub fn emit_source_retry(
    operation: &str,
    attempt: u32,
    delay_ms: u64,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "source.retry",
        operation = %operation,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    buckets: usize,
    verdicts: usize,
    skipped: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        buckets = buckets,
        verdicts = verdicts,
        skipped = skipped,
    );
}
