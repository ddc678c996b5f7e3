//! Report model and JSON persistence.
//!
//! Charts follow a fixed schema consumed by the rendering front end:
//! `{ title, type, labels, datasets: [{ label, data }], indexAxis,
//! display_legend }`, with `data` aligned to `labels` and `null` where a
//! bucket has no value.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Bucket, Granularity};
use crate::domain::{ReportError, ReportResult};
use crate::extract::{ChartKind, MetricCatalog};
use crate::flakiness::{Classification, FlakinessSummary, FlakinessVerdict};
use crate::source::RepositoryStats;

pub const REPORT_SCHEMA_VERSION: &str = "1.0";

const FLAKINESS_CHART_TITLE: &str = "Test flakiness";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexAxis {
    #[default]
    X,
    Y,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    #[serde(rename = "indexAxis")]
    pub index_axis: IndexAxis,
    pub display_legend: bool,
}

/// Presentation metadata for one charted metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderHint {
    pub metric: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub chart: String,
    pub chart_kind: ChartKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// The extractor found none of the data it reads.
    Skipped,
    /// The extractor failed on this revision.
    Failed,
}

/// An extractor that produced nothing for one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub revision_id: String,
    pub extractor: String,
    pub reason: String,
    pub kind: SkipKind,
}

/// How many analyzed revisions produced a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCoverage {
    pub revisions: usize,
    pub of: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub revisions_discovered: usize,
    pub revisions_analyzed: usize,
    pub skipped: Vec<SkipRecord>,
    pub metric_coverage: BTreeMap<String, MetricCoverage>,
    #[serde(default)]
    pub flakiness: FlakinessSummary,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &SkipRecord> {
        self.skipped.iter().filter(|s| s.kind == SkipKind::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub target: String,
    pub granularity: Granularity,
    pub buckets: Vec<Bucket>,
    pub flakiness: Vec<FlakinessVerdict>,
    pub hints: Vec<RenderHint>,
    pub summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryStats>,
    pub charts: Vec<Chart>,
}

/// Assembles a [`Report`] from aggregation and classification results.
pub struct ReportBuilder<'a> {
    catalog: &'a MetricCatalog,
    target: String,
    granularity: Granularity,
    run_id: Uuid,
    buckets: Vec<Bucket>,
    verdicts: Vec<FlakinessVerdict>,
    summary: RunSummary,
    repository: Option<RepositoryStats>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(
        target: impl Into<String>,
        granularity: Granularity,
        catalog: &'a MetricCatalog,
    ) -> Self {
        Self {
            catalog,
            target: target.into(),
            granularity,
            run_id: Uuid::new_v4(),
            buckets: Vec::new(),
            verdicts: Vec::new(),
            summary: RunSummary::default(),
            repository: None,
        }
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn buckets(mut self, buckets: Vec<Bucket>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn verdicts(mut self, verdicts: Vec<FlakinessVerdict>) -> Self {
        self.verdicts = verdicts;
        self
    }

    pub fn summary(mut self, summary: RunSummary) -> Self {
        self.summary = summary;
        self
    }

    pub fn repository(mut self, repository: Option<RepositoryStats>) -> Self {
        self.repository = repository;
        self
    }

    /// Fails with [`ReportError::NoData`] when there is nothing to report.
    pub fn build(self) -> ReportResult<Report> {
        if self.buckets.is_empty() && self.verdicts.is_empty() {
            return Err(ReportError::NoData);
        }

        let metrics = self.charted_metrics();
        let hints = self.hints(&metrics);
        let mut charts = self.metric_charts(&hints);
        if !self.verdicts.is_empty() {
            charts.push(flakiness_chart(&FlakinessSummary::from_verdicts(&self.verdicts)));
        }

        let mut summary = self.summary;
        summary.flakiness = FlakinessSummary::from_verdicts(&self.verdicts);

        Ok(Report {
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            run_id: self.run_id,
            generated_at: Utc::now(),
            target: self.target,
            granularity: self.granularity,
            buckets: self.buckets,
            flakiness: self.verdicts,
            hints,
            summary,
            repository: self.repository,
            charts,
        })
    }

    /// Numeric metrics present in any bucket: catalog order first, then
    /// unregistered names alphabetically.
    fn charted_metrics(&self) -> Vec<String> {
        let mut names: Vec<&String> = self
            .buckets
            .iter()
            .flat_map(|b| b.metrics.iter())
            .filter(|(_, v)| v.value.as_f64().is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort_by(|a, b| {
            let pos = |n: &str| self.catalog.position(n).unwrap_or(usize::MAX);
            pos(a).cmp(&pos(b)).then_with(|| a.cmp(b))
        });
        names.dedup();
        names.into_iter().cloned().collect()
    }

    fn hints(&self, metrics: &[String]) -> Vec<RenderHint> {
        metrics
            .iter()
            .map(|name| match self.catalog.get(name) {
                Some(d) => RenderHint {
                    metric: d.name.clone(),
                    title: d.title.clone(),
                    unit: d.unit.clone(),
                    chart: d.chart.clone(),
                    chart_kind: d.chart_kind,
                },
                None => RenderHint {
                    metric: name.clone(),
                    title: name.clone(),
                    unit: None,
                    chart: name.clone(),
                    chart_kind: ChartKind::Line,
                },
            })
            .collect()
    }

    fn metric_charts(&self, hints: &[RenderHint]) -> Vec<Chart> {
        let labels: Vec<String> = self.buckets.iter().map(|b| b.key.to_string()).collect();
        let mut charts: Vec<Chart> = Vec::new();
        for hint in hints {
            let dataset = Dataset {
                label: hint.title.clone(),
                data: self.buckets.iter().map(|b| b.numeric(&hint.metric)).collect(),
            };
            match charts.iter_mut().find(|c| c.title == hint.chart) {
                Some(chart) => chart.datasets.push(dataset),
                None => charts.push(Chart {
                    title: hint.chart.clone(),
                    kind: hint.chart_kind,
                    labels: labels.clone(),
                    datasets: vec![dataset],
                    index_axis: IndexAxis::X,
                    display_legend: false,
                }),
            }
        }
        for chart in &mut charts {
            chart.display_legend = chart.datasets.len() > 1;
        }
        charts
    }
}

/// Horizontal bar chart of verdict counts.
fn flakiness_chart(summary: &FlakinessSummary) -> Chart {
    Chart {
        title: FLAKINESS_CHART_TITLE.to_string(),
        kind: ChartKind::Bar,
        labels: Classification::ALL.iter().map(|c| c.as_str().to_string()).collect(),
        datasets: vec![Dataset {
            label: "Tests".to_string(),
            data: Classification::ALL
                .iter()
                .map(|c| Some(summary.count(*c) as f64))
                .collect(),
        }],
        index_axis: IndexAxis::Y,
        display_legend: false,
    }
}

/// Write the report as pretty JSON.
pub fn write_report_json(path: &Path, report: &Report) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a report written by [`write_report_json`].
pub fn read_report_json(path: &Path) -> anyhow::Result<Report> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse report {:?}", path))
}

/// Plain-text run summary for terminals.
pub fn render_summary_text(report: &Report) -> String {
    let s = &report.summary;
    let mut out = format!(
        "{}: {} of {} revisions analyzed into {} bucket(s)\n",
        report.target,
        s.revisions_analyzed,
        s.revisions_discovered,
        report.buckets.len()
    );
    if !report.flakiness.is_empty() {
        out.push_str(&format!(
            "tests: {} stable, {} flaky, {} always-failing\n",
            s.flakiness.stable, s.flakiness.flaky, s.flakiness.always_failing
        ));
    }
    let failures: Vec<&SkipRecord> = s.failures().collect();
    let without_data = s.skipped.len() - failures.len();
    if without_data > 0 {
        out.push_str(&format!("{without_data} extraction(s) skipped for lack of data\n"));
    }
    if !failures.is_empty() {
        out.push_str(&format!("{} extractor failure(s):\n", failures.len()));
        for f in failures {
            let short: String = f.revision_id.chars().take(8).collect();
            out.push_str(&format!("  - {} @ {}: {}\n", f.extractor, short, f.reason));
        }
    }
    for (metric, cov) in &s.metric_coverage {
        if cov.revisions < cov.of {
            out.push_str(&format!(
                "  {metric}: available in {}/{} revisions\n",
                cov.revisions, cov.of
            ));
        }
    }
    out
}
