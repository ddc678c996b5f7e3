//! Process-wide counters for testpulse runs.
//!
//! Counters only ever grow. A run takes a [`MetricsSnapshot`] when it
//! starts and [`Metrics::flush_since`] reports what happened after it as a
//! single `tracing::info!` event, so repeated or concurrent runs in one
//! process each log their own numbers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    revisions_extracted: AtomicU64,
    samples_emitted: AtomicU64,
    extractions_skipped: AtomicU64,
    source_retries: AtomicU64,
}

/// Counter values at one point in time, or the difference of two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub revisions_extracted: u64,
    pub samples_emitted: u64,
    pub extractions_skipped: u64,
    pub source_retries: u64,
}

impl MetricsSnapshot {
    /// Growth since `earlier`.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            revisions_extracted: self
                .revisions_extracted
                .saturating_sub(earlier.revisions_extracted),
            samples_emitted: self.samples_emitted.saturating_sub(earlier.samples_emitted),
            extractions_skipped: self
                .extractions_skipped
                .saturating_sub(earlier.extractions_skipped),
            source_retries: self.source_retries.saturating_sub(earlier.source_retries),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            revisions_extracted: AtomicU64::new(0),
            samples_emitted: AtomicU64::new(0),
            extractions_skipped: AtomicU64::new(0),
            source_retries: AtomicU64::new(0),
        }
    }

    pub fn inc_revisions_extracted(&self) {
        self.revisions_extracted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "revisions_extracted", "counter incremented");
    }

    pub fn add_samples_emitted(&self, n: u64) {
        self.samples_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_extractions_skipped(&self) {
        self.extractions_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extractions_skipped", "counter incremented");
    }

    pub fn inc_source_retries(&self) {
        self.source_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "source_retries", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            revisions_extracted: self.revisions_extracted.load(Ordering::Relaxed),
            samples_emitted: self.samples_emitted.load(Ordering::Relaxed),
            extractions_skipped: self.extractions_skipped.load(Ordering::Relaxed),
            source_retries: self.source_retries.load(Ordering::Relaxed),
        }
    }

    /// Emit the growth since `baseline` as a single `info!` event and
    /// return it.
    pub fn flush_since(&self, baseline: &MetricsSnapshot) -> MetricsSnapshot {
        let delta = self.snapshot().since(baseline);
        tracing::info!(
            metric = "flush",
            revisions_extracted = delta.revisions_extracted,
            samples_emitted = delta.samples_emitted,
            extractions_skipped = delta.extractions_skipped,
            source_retries = delta.source_retries,
        );
        delta
    }
}
