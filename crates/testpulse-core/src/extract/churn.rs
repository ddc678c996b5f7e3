//! Lines changed in production versus test code by each revision.

use async_trait::async_trait;

use super::files::is_test_file;
use super::{ChartKind, Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const CODE_LINES: &str = "churn.code_lines";
pub const TEST_LINES: &str = "churn.test_lines";

pub struct ChurnExtractor;

#[async_trait]
impl Extractor for ChurnExtractor {
    fn name(&self) -> &'static str {
        "churn"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(CODE_LINES, "Production lines changed")
                .unit("lines")
                .merge(MergeRule::Sum)
                .chart("Code vs test evolution")
                .chart_kind(ChartKind::Bar),
            MetricDescriptor::new(TEST_LINES, "Test lines changed")
                .unit("lines")
                .merge(MergeRule::Sum)
                .chart("Code vs test evolution")
                .chart_kind(ChartKind::Bar),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let Some(changes) = tree.diff_stats().await? else {
            return Ok(Extraction::skipped("no diff information"));
        };
        let (mut code, mut tests) = (0u64, 0u64);
        for change in changes {
            let lines = change.added + change.deleted;
            if is_test_file(&change.path) {
                tests += lines;
            } else {
                code += lines;
            }
        }
        Ok(Extraction::Samples(vec![
            MetricSample::numeric(CODE_LINES, revision, code as f64),
            MetricSample::numeric(TEST_LINES, revision, tests as f64),
        ]))
    }
}
