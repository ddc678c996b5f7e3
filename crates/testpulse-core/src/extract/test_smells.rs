//! Test smells: test files that define no tests, assert nothing, or
//! declare fixture hooks nobody calls.
//!
//! Each smell counts files, not occurrences. Fixture hooks are only
//! recognized in Python (`setUp`, `tearDown`, `setup_method`,
//! `teardown_method`); a hook counts as used when some line calls it by bare
//! name.

use async_trait::async_trait;
use regex::Regex;

use super::files::{is_source_file, is_test_file};
use super::{ChartKind, Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const EMPTY_TESTS: &str = "test_smells.empty_tests";
pub const NO_ASSERT: &str = "test_smells.no_assert";
pub const UNUSED_SETUP: &str = "test_smells.unused_setup";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SmellCounts {
    pub empty_tests: u64,
    pub no_assert: u64,
    pub unused_setup: u64,
}

pub struct TestSmellExtractor {
    test_def: Regex,
    assertion: Regex,
    hook_def: Regex,
    hook_call: Regex,
}

impl Default for TestSmellExtractor {
    fn default() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("static regex");
        Self {
            test_def: re(concat!(
                r"(?m)^\s*(?:async\s+)?def\s+test\w*\s*\(",
                r"|#\[(?:\w+::)?test\]",
                r"|\bfunc\s+Test\w*\s*\(",
                r#"|\b(?:it|test)\s*\(\s*["'`]"#,
                r"|@Test\b",
            )),
            assertion: re(concat!(
                r"\bassert\w*!?\s*\(|(?m:^\s*assert\s)|\bexpect\s*\(",
                r"|\bt\.(?:Error|Errorf|Fatal|Fatalf)\s*\(",
            )),
            hook_def: re(r"(?m)^\s*def\s+(?:setUp|tearDown|setup_method|teardown_method)\s*\("),
            hook_call: re(r"\b(?:setUp|tearDown|setup_method|teardown_method)\s*\("),
        }
    }
}

impl TestSmellExtractor {
    /// Smells of one test file; every field is 0 or 1.
    pub fn smells(&self, source: &str) -> SmellCounts {
        let defines_hook = self.hook_def.is_match(source);
        SmellCounts {
            empty_tests: u64::from(!self.test_def.is_match(source)),
            no_assert: u64::from(!self.assertion.is_match(source)),
            unused_setup: u64::from(defines_hook && !self.calls_hook(source)),
        }
    }

    fn calls_hook(&self, source: &str) -> bool {
        self.hook_call.find_iter(source).any(|m| {
            let before = source[..m.start()].trim_end();
            !(before.ends_with("def") || before.ends_with('.'))
        })
    }
}

#[async_trait]
impl Extractor for TestSmellExtractor {
    fn name(&self) -> &'static str {
        "test_smells"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        [
            (EMPTY_TESTS, "Files without tests"),
            (NO_ASSERT, "Files without assertions"),
            (UNUSED_SETUP, "Unused setup hooks"),
        ]
        .into_iter()
        .map(|(name, title)| {
            MetricDescriptor::new(name, title)
                .merge(MergeRule::Latest)
                .chart("Test smells")
                .chart_kind(ChartKind::Bar)
        })
        .collect()
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut counts = SmellCounts::default();
        let mut files = 0usize;
        for path in tree.list_files().await? {
            if !is_test_file(&path) || !is_source_file(&path) {
                continue;
            }
            let Some(source) = tree.read_to_string(&path).await? else {
                continue;
            };
            files += 1;
            let smells = self.smells(&source);
            counts.empty_tests += smells.empty_tests;
            counts.no_assert += smells.no_assert;
            counts.unused_setup += smells.unused_setup;
        }
        if files == 0 {
            return Ok(Extraction::skipped("no test files"));
        }

        let samples = [
            (EMPTY_TESTS, counts.empty_tests),
            (NO_ASSERT, counts.no_assert),
            (UNUSED_SETUP, counts.unused_setup),
        ]
        .into_iter()
        .map(|(name, n)| MetricSample::numeric(name, revision, n as f64))
        .collect();
        Ok(Extraction::Samples(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryTree;
    use chrono::Utc;

    #[test]
    fn test_healthy_python_file_has_no_smells() {
        let src = r#"
import unittest

class T(unittest.TestCase):
    def setUp(self):
        self.x = 1

    def test_x(self):
        self.assertEqual(self.x, 1)

    def test_again(self):
        setUp(self)
"#;
        assert_eq!(TestSmellExtractor::default().smells(src), SmellCounts::default());
    }

    #[test]
    fn test_hook_called_only_as_method_is_unused() {
        let src = r#"
class T:
    def setup_method(self):
        self.setup_method()

    def test_a(self):
        assert True
"#;
        let smells = TestSmellExtractor::default().smells(src);
        assert_eq!(smells.unused_setup, 1);
        assert_eq!(smells.empty_tests, 0);
        assert_eq!(smells.no_assert, 0);
    }

    #[test]
    fn test_other_languages() {
        let ex = TestSmellExtractor::default();
        let rust = "#[test]\nfn adds() {\n    assert_eq!(1 + 1, 2);\n}\n";
        assert_eq!(ex.smells(rust), SmellCounts::default());

        let js = "describe('x', () => {\n  it('runs', () => {\n    run();\n  });\n});\n";
        let smells = ex.smells(js);
        assert_eq!(smells.empty_tests, 0);
        assert_eq!(smells.no_assert, 1);

        let go = "package x\n\nfunc helper() {}\n";
        assert_eq!(ex.smells(go).empty_tests, 1);
    }

    #[tokio::test]
    async fn test_counts_files_per_smell() {
        let tree = MemoryTree::new()
            .with_file("tests/test_ok.py", "def test_ok():\n    assert 1\n")
            .with_file("tests/test_empty.py", "import pytest\n")
            .with_file("tests/test_quiet.py", "def test_quiet():\n    run()\n")
            .with_file("tests/fixtures/data.json", "{}\n")
            .with_file("app/main.py", "def main():\n    pass\n");
        let rev = RevisionRef::new("r1", Utc::now(), None);
        let Extraction::Samples(samples) = TestSmellExtractor::default()
            .extract(&rev, &tree)
            .await
            .unwrap()
        else {
            panic!("expected samples");
        };
        let value = |name: &str| {
            samples
                .iter()
                .find(|s| s.metric == name)
                .and_then(|s| s.value.as_f64())
        };
        assert_eq!(value(EMPTY_TESTS), Some(1.0));
        assert_eq!(value(NO_ASSERT), Some(2.0));
        assert_eq!(value(UNUSED_SETUP), Some(0.0));
    }

    #[tokio::test]
    async fn test_no_test_files_is_skipped() {
        let tree = MemoryTree::new().with_file("app/main.py", "x = 1\n");
        let rev = RevisionRef::new("r1", Utc::now(), None);
        let extraction = TestSmellExtractor::default().extract(&rev, &tree).await.unwrap();
        assert!(matches!(extraction, Extraction::Skipped { .. }));
    }
}
