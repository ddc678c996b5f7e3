//! Production functions referenced from test code.
//!
//! A production function is a named definition in a non-test source file;
//! distinct names are counted once. It counts as tested when its name
//! appears as an identifier anywhere in a test file.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::files::{is_test_file, Language};
use super::{Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const TOTAL: &str = "functions.total";
pub const TESTED: &str = "functions.tested";
pub const TESTED_PCT: &str = "functions.tested_pct";

pub struct FunctionsTestedExtractor;

fn definition(language: Language) -> &'static Regex {
    static PYTHON: OnceLock<Regex> = OnceLock::new();
    static RUST: OnceLock<Regex> = OnceLock::new();
    static GO: OnceLock<Regex> = OnceLock::new();
    static JAVA: OnceLock<Regex> = OnceLock::new();
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    let re = |pattern: &str| Regex::new(pattern).expect("static regex");
    match language {
        Language::Python => PYTHON.get_or_init(|| re(r"(?m)^\s*(?:async\s+)?def\s+(\w+)")),
        Language::Rust => RUST.get_or_init(|| re(r"\bfn\s+(\w+)")),
        Language::Go => GO.get_or_init(|| re(r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)")),
        Language::Java => JAVA.get_or_init(|| {
            re(r"(?m)^\s*(?:public|private|protected)\s+(?:static\s+)?[\w<>\[\],]+\s+(\w+)\s*\(")
        }),
        Language::JavaScript | Language::TypeScript => SCRIPT.get_or_init(|| {
            re(concat!(
                r"\bfunction\s*\*?\s*(\w+)",
                r"|\b(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?(?:\([^)]*\)|\w+)\s*=>",
            ))
        }),
    }
}

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z_]\w*").expect("static regex"))
}

/// Names defined in one production file, dunder methods and `main` excluded.
pub fn defined_functions(language: Language, source: &str) -> Vec<String> {
    definition(language)
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str())
        .filter(|name| !name.starts_with("__") && *name != "main")
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Extractor for FunctionsTestedExtractor {
    fn name(&self) -> &'static str {
        "functions_tested"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(TOTAL, "Production functions")
                .merge(MergeRule::Latest)
                .chart("Functions"),
            MetricDescriptor::new(TESTED, "Referenced by tests")
                .merge(MergeRule::Latest)
                .chart("Functions"),
            MetricDescriptor::new(TESTED_PCT, "Functions referenced by tests")
                .unit("%")
                .chart("Function test reach"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut functions = BTreeSet::new();
        let mut referenced: HashSet<String> = HashSet::new();
        for path in tree.list_files().await? {
            let Some(language) = Language::from_path(&path) else {
                continue;
            };
            let Some(source) = tree.read_to_string(&path).await? else {
                continue;
            };
            if is_test_file(&path) {
                referenced.extend(identifier().find_iter(&source).map(|m| m.as_str().to_string()));
            } else {
                functions.extend(defined_functions(language, &source));
            }
        }
        if functions.is_empty() {
            return Ok(Extraction::skipped("no production functions"));
        }

        let total = functions.len();
        let tested = functions.iter().filter(|f| referenced.contains(*f)).count();
        Ok(Extraction::Samples(vec![
            MetricSample::numeric(TOTAL, revision, total as f64),
            MetricSample::numeric(TESTED, revision, tested as f64),
            MetricSample::numeric(TESTED_PCT, revision, 100.0 * tested as f64 / total as f64),
        ]))
    }
}
