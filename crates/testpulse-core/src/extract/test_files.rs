//! Test suite size: how many test files and how long they are.

use async_trait::async_trait;

use super::files::{is_source_file, is_test_file};
use super::{Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const COUNT: &str = "test_files.count";
pub const AVG_LINES: &str = "test_files.avg_lines";

pub struct TestFileExtractor;

#[async_trait]
impl Extractor for TestFileExtractor {
    fn name(&self) -> &'static str {
        "test_files"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(COUNT, "Test files")
                .merge(MergeRule::Latest)
                .chart("Test files"),
            MetricDescriptor::new(AVG_LINES, "Lines per test file")
                .unit("lines")
                .chart("Test file length"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut files = 0u64;
        let mut lines = 0u64;
        for path in tree.list_files().await? {
            // Fixtures and snapshots under test directories are not test code.
            if !is_test_file(&path) || !is_source_file(&path) {
                continue;
            }
            if let Some(source) = tree.read_to_string(&path).await? {
                files += 1;
                lines += source.lines().count() as u64;
            }
        }
        if files == 0 {
            return Ok(Extraction::skipped("no test files"));
        }
        Ok(Extraction::Samples(vec![
            MetricSample::numeric(COUNT, revision, files as f64),
            MetricSample::numeric(AVG_LINES, revision, lines as f64 / files as f64),
        ]))
    }
}
