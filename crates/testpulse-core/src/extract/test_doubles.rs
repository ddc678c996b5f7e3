//! Test double usage in test files.
//!
//! Counts are lexical and language-agnostic. A `patch(...)` call counts as a
//! spy when it passes `wraps=`, otherwise as a mock.

use async_trait::async_trait;
use regex::Regex;

use super::files::is_test_file;
use super::{Extraction, Extractor, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const MOCKS: &str = "test_doubles.mocks";
pub const SPIES: &str = "test_doubles.spies";
pub const STUBS: &str = "test_doubles.stubs";
pub const FAKES: &str = "test_doubles.fakes";
pub const DUMMIES: &str = "test_doubles.dummies";
pub const TOTAL: &str = "test_doubles.total";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DoubleCounts {
    pub mocks: u64,
    pub spies: u64,
    pub stubs: u64,
    pub fakes: u64,
    pub dummies: u64,
}

impl DoubleCounts {
    pub fn total(&self) -> u64 {
        self.mocks + self.spies + self.stubs + self.fakes + self.dummies
    }

    fn merge(&mut self, other: DoubleCounts) {
        self.mocks += other.mocks;
        self.spies += other.spies;
        self.stubs += other.stubs;
        self.fakes += other.fakes;
        self.dummies += other.dummies;
    }
}

pub struct TestDoubleExtractor {
    mock_call: Regex,
    patch_call: Regex,
    spy_call: Regex,
    stub: Regex,
    fake: Regex,
    dummy: Regex,
}

impl Default for TestDoubleExtractor {
    fn default() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("static regex");
        Self {
            mock_call: re(
                r"\b(?:Mock|MagicMock|AsyncMock|NonCallableMock|create_autospec|jest\.fn|jest\.mock|sinon\.mock|Mockito\.mock|gomock\.NewController)\s*\(|\bmock!\s*[{(]|#\[automock\]",
            ),
            patch_call: re(r"\b(?:mock\.)?patch(?:\.object|\.dict|\.multiple)?\s*\("),
            spy_call: re(r"\b(?:spyOn|sinon\.spy|Mockito\.spy|mocker\.spy)\s*\("),
            stub: re(
                r"(?i)\b(?:def|fn|func|function|class|struct)\s+\w*stub\w*|\bsinon\.stub\s*\(",
            ),
            fake: re(r"(?i)\b(?:class|struct|type)\s+\w*fake\w*"),
            dummy: re(r"(?i)\b\w*(?:dummy|placeholder)\w*\s*(?:=[^=]|:)"),
        }
    }
}

impl TestDoubleExtractor {
    /// Counts for one test file's source.
    pub fn count(&self, source: &str) -> DoubleCounts {
        let mut counts = DoubleCounts {
            mocks: self.mock_call.find_iter(source).count() as u64,
            spies: self.spy_call.find_iter(source).count() as u64,
            stubs: self.stub.find_iter(source).count() as u64,
            fakes: self.fake.find_iter(source).count() as u64,
            dummies: self.dummy.find_iter(source).count() as u64,
        };
        for m in self.patch_call.find_iter(source) {
            if call_arguments(&source[m.end()..]).contains("wraps=") {
                counts.spies += 1;
            } else {
                counts.mocks += 1;
            }
        }
        counts
    }
}

/// Text up to the parenthesis closing a call whose `(` was just consumed.
fn call_arguments(rest: &str) -> &str {
    let mut depth = 1usize;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..i];
                }
            }
            _ => {}
        }
    }
    rest
}

#[async_trait]
impl Extractor for TestDoubleExtractor {
    fn name(&self) -> &'static str {
        "test_doubles"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        [
            (MOCKS, "Mocks"),
            (SPIES, "Spies"),
            (STUBS, "Stubs"),
            (FAKES, "Fakes"),
            (DUMMIES, "Dummies"),
            (TOTAL, "All test doubles"),
        ]
        .into_iter()
        .map(|(name, title)| MetricDescriptor::new(name, title).chart("Test doubles"))
        .collect()
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut counts = DoubleCounts::default();
        let mut test_files = 0usize;
        for path in tree.list_files().await? {
            if !is_test_file(&path) {
                continue;
            }
            if let Some(source) = tree.read_to_string(&path).await? {
                test_files += 1;
                counts.merge(self.count(&source));
            }
        }
        if test_files == 0 {
            return Ok(Extraction::skipped("no test files"));
        }

        let samples = [
            (MOCKS, counts.mocks),
            (SPIES, counts.spies),
            (STUBS, counts.stubs),
            (FAKES, counts.fakes),
            (DUMMIES, counts.dummies),
            (TOTAL, counts.total()),
        ]
        .into_iter()
        .map(|(name, n)| MetricSample::numeric(name, revision, n as f64))
        .collect();
        Ok(Extraction::Samples(samples))
    }
}
