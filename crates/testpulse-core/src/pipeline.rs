//! End-to-end analysis run.
//!
//! 1. open the revision source and list its revisions
//! 2. extract every revision on a bounded worker pool
//! 3. aggregate, classify and build the report once every worker finished
//!
//! Dropping the run future cancels it: the worker set is aborted, child `git`
//! processes are killed and any temporary clone is removed.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::config::AnalyzerConfig;
use crate::domain::{
    ExtractError, MetricSample, MetricValue, PulseError, Result, RevisionRef, SourceError,
    TEST_OUTCOME_METRIC,
};
use crate::extract::{Extraction, Extractor, ExtractorRegistry};
use crate::flakiness::classify;
use crate::metrics::{MetricsSnapshot, METRICS};
use crate::obs::{
    emit_extractor_skipped, emit_revision_extracted, emit_run_finished, emit_run_started, run_span,
};
use crate::report::{MetricCoverage, Report, ReportBuilder, RunSummary, SkipKind, SkipRecord};
use crate::retry::RateLimitState;
use crate::source::{open_source, thin_revisions, RevisionSource, RevisionTree, TargetDescriptor};

/// Everything one revision produced.
#[derive(Debug, Default)]
struct RevisionExtraction {
    samples: Vec<MetricSample>,
    skips: Vec<SkipRecord>,
}

/// Runs the extractor registry over a target's history.
pub struct Analyzer {
    registry: ExtractorRegistry,
    config: AnalyzerConfig,
    limiter: Arc<RateLimitState>,
}

impl Analyzer {
    pub fn new(registry: ExtractorRegistry, config: AnalyzerConfig) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(PulseError::InvalidConfig("no extractors registered".into()));
        }
        Ok(Self {
            registry,
            config,
            limiter: Arc::new(RateLimitState::new()),
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Shared rate-limit state of this analyzer's remote requests.
    pub fn rate_limit(&self) -> &Arc<RateLimitState> {
        &self.limiter
    }

    /// Analyze `target`, honouring `timeout_secs`.
    pub async fn run(&self, target: &TargetDescriptor) -> Result<Report> {
        match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run_target(target))
                .await
                .map_err(|_| PulseError::TimedOut(secs))?,
            None => self.run_target(target).await,
        }
    }

    /// Like [`Analyzer::run`], abandoning the run when `shutdown` resolves.
    pub async fn run_with_shutdown<F>(
        &self,
        target: &TargetDescriptor,
        shutdown: F,
    ) -> Result<Report>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(target) => result,
            _ = shutdown => Err(PulseError::Cancelled),
        }
    }

    async fn run_target(&self, target: &TargetDescriptor) -> Result<Report> {
        // Opening a remote source already retries, so count from here.
        let baseline = METRICS.snapshot();
        let source = open_source(target, &self.config, self.limiter.clone()).await?;
        self.run_counted(Arc::from(source), baseline).await
    }

    /// Analyze an already opened source.
    pub async fn run_source(&self, source: Arc<dyn RevisionSource>) -> Result<Report> {
        self.run_counted(source, METRICS.snapshot()).await
    }

    async fn run_counted(
        &self,
        source: Arc<dyn RevisionSource>,
        baseline: MetricsSnapshot,
    ) -> Result<Report> {
        let run_id = Uuid::new_v4();
        let span = run_span(&run_id.to_string());
        self.analyze(run_id, source, baseline).instrument(span).await
    }

    async fn analyze(
        &self,
        run_id: Uuid,
        source: Arc<dyn RevisionSource>,
        baseline: MetricsSnapshot,
    ) -> Result<Report> {
        let started = Instant::now();
        let target = source.describe();

        let mut revisions = source.revisions().await?;
        let discovered = revisions.len();
        if discovered == 0 {
            return Err(SourceError::NoRevisions(target).into());
        }
        if let Some(max) = self.config.max_revisions {
            revisions = thin_revisions(revisions, max);
        }
        emit_run_started(&run_id.to_string(), &target, revisions.len());

        let extracted = self.extract_all(source.as_ref(), &revisions).await?;

        let mut samples = Vec::new();
        let mut skipped = Vec::new();
        for revision in extracted {
            samples.extend(revision.samples);
            skipped.extend(revision.skips);
        }

        let catalog = self.registry.catalog();
        let metric_coverage = metric_coverage(&samples, &revisions, &catalog);
        let records: Vec<_> = samples.iter().filter_map(MetricSample::as_outcome).collect();
        let verdicts = classify(&records);
        let buckets = aggregate(&samples, self.config.granularity, &catalog);

        let repository = match source.repository_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "repository statistics unavailable");
                None
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = RunSummary {
            revisions_discovered: discovered,
            revisions_analyzed: revisions.len(),
            skipped,
            metric_coverage,
            duration_ms,
            ..RunSummary::default()
        };
        let skipped_count = summary.skipped.len();
        let bucket_count = buckets.len();
        let verdict_count = verdicts.len();

        let report = ReportBuilder::new(target, self.config.granularity, &catalog)
            .run_id(run_id)
            .buckets(buckets)
            .verdicts(verdicts)
            .summary(summary)
            .repository(repository)
            .build()?;

        METRICS.flush_since(&baseline);
        emit_run_finished(
            &run_id.to_string(),
            duration_ms,
            bucket_count,
            verdict_count,
            skipped_count,
        );
        Ok(report)
    }

    /// Extract every revision, at most `jobs` at a time. Results come back in
    /// revision order.
    async fn extract_all(
        &self,
        source: &dyn RevisionSource,
        revisions: &[RevisionRef],
    ) -> Result<Vec<RevisionExtraction>> {
        let semaphore = Arc::new(Semaphore::new(self.config.jobs));
        let extractors: Arc<Vec<Arc<dyn Extractor>>> =
            Arc::new(self.registry.iter().cloned().collect());

        let mut join_set = JoinSet::new();
        for (idx, revision) in revisions.iter().cloned().enumerate() {
            let previous = idx.checked_sub(1).map(|p| &revisions[p]);
            let tree = source.tree(&revision, previous);
            let semaphore = Arc::clone(&semaphore);
            let extractors = Arc::clone(&extractors);
            join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    (idx, extract_revision(&revision, tree.as_ref(), &extractors).await)
                }
                .in_current_span(),
            );
        }

        let mut ordered: Vec<Option<RevisionExtraction>> =
            (0..revisions.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (idx, extraction) =
                joined.map_err(|e| PulseError::Worker(format!("extraction task join error: {e}")))?;
            ordered[idx] = Some(extraction);
        }
        Ok(ordered.into_iter().flatten().collect())
    }
}

/// Run every extractor against one revision concurrently. Extractor errors
/// become skip records; they never abort the revision. So does a NaN or
/// infinite sample, which the JSON report could not carry.
async fn extract_revision(
    revision: &RevisionRef,
    tree: &dyn RevisionTree,
    extractors: &[Arc<dyn Extractor>],
) -> RevisionExtraction {
    let results = join_all(extractors.iter().map(|e| e.extract(revision, tree))).await;

    let mut out = RevisionExtraction::default();
    for (extractor, result) in extractors.iter().zip(results) {
        let (reason, kind) = match result {
            Ok(Extraction::Samples(samples)) => match first_non_finite(&samples) {
                Some(metric) => {
                    let err = ExtractError::NonFinite {
                        metric: metric.to_string(),
                    };
                    (err.to_string(), SkipKind::Failed)
                }
                None => {
                    out.samples.extend(samples);
                    continue;
                }
            },
            Ok(Extraction::Skipped { reason }) => (reason, SkipKind::Skipped),
            Err(e) => (e.to_string(), SkipKind::Failed),
        };
        emit_extractor_skipped(
            &revision.id,
            extractor.name(),
            &reason,
            kind == SkipKind::Failed,
        );
        METRICS.inc_extractions_skipped();
        out.skips.push(SkipRecord {
            revision_id: revision.id.clone(),
            extractor: extractor.name().to_string(),
            reason,
            kind,
        });
    }

    METRICS.inc_revisions_extracted();
    METRICS.add_samples_emitted(out.samples.len() as u64);
    emit_revision_extracted(&revision.id, out.samples.len(), out.skips.len());
    out
}

fn first_non_finite(samples: &[MetricSample]) -> Option<&str> {
    samples
        .iter()
        .find(|s| matches!(s.value, MetricValue::Numeric(v) if !v.is_finite()))
        .map(|s| s.metric.as_str())
}

/// Per metric, how many analyzed revisions produced it. Every registered
/// metric is listed, including ones no revision produced.
fn metric_coverage(
    samples: &[MetricSample],
    revisions: &[RevisionRef],
    catalog: &crate::extract::MetricCatalog,
) -> BTreeMap<String, MetricCoverage> {
    let mut seen: BTreeMap<&str, BTreeSet<&str>> = catalog
        .descriptors()
        .iter()
        .map(|d| (d.name.as_str(), BTreeSet::new()))
        .collect();
    for sample in samples.iter().filter(|s| s.metric != TEST_OUTCOME_METRIC) {
        seen.entry(sample.metric.as_str())
            .or_default()
            .insert(sample.revision.id.as_str());
    }
    seen.into_iter()
        .map(|(name, revs)| {
            (
                name.to_string(),
                MetricCoverage {
                    revisions: revs.len(),
                    of: revisions.len(),
                },
            )
        })
        .collect()
}
