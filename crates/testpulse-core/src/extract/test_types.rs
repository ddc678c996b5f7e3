//! Test files classified as unit, integration or end-to-end by what they
//! import.
//!
//! Only Python and JavaScript/TypeScript test files are classified. A test
//! framework import makes a file a unit test even when it also imports
//! network or browser libraries; otherwise networking and database clients
//! mark integration tests and browser drivers mark end-to-end tests.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::files::{is_test_file, Language};
use super::{ChartKind, Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const UNIT: &str = "test_types.unit";
pub const INTEGRATION: &str = "test_types.integration";
pub const E2E: &str = "test_types.e2e";
pub const UNKNOWN: &str = "test_types.unknown";

const UNIT_MODULES: &[&str] = &["unittest", "pytest", "jest", "@jest/globals", "vitest", "mocha"];
const INTEGRATION_MODULES: &[&str] = &[
    "requests",
    "httpx",
    "socket",
    "docker",
    "psycopg2",
    "sqlalchemy",
    "supertest",
    "axios",
    "pg",
];
const E2E_MODULES: &[&str] = &[
    "selenium",
    "playwright",
    "@playwright/test",
    "puppeteer",
    "cypress",
    "selenium-webdriver",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    Unit,
    Integration,
    EndToEnd,
    Unknown,
}

impl TestType {
    fn from_imports(imports: &HashSet<String>) -> Self {
        let any = |modules: &[&str]| modules.iter().any(|m| imports.contains(*m));
        if any(UNIT_MODULES) {
            Self::Unit
        } else if any(INTEGRATION_MODULES) {
            Self::Integration
        } else if any(E2E_MODULES) {
            Self::EndToEnd
        } else {
            Self::Unknown
        }
    }
}

/// Classify one test file, `None` for languages without import rules.
pub fn classify(language: Language, source: &str) -> Option<TestType> {
    let imports = match language {
        Language::Python => python_imports(source),
        Language::JavaScript | Language::TypeScript => script_imports(source),
        _ => return None,
    };
    Some(TestType::from_imports(&imports))
}

fn python_import() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:import\s+([\w.]+(?:\s*,\s*[\w.]+)*)|from\s+([\w.]+)\s+import\b)")
            .expect("static regex")
    })
}

fn script_import() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r#"\bfrom\s+["']([^"']+)["']"#,
            r#"|\bimport\s+["']([^"']+)["']"#,
            r#"|\brequire\s*\(\s*["']([^"']+)["']\s*\)"#,
        ))
        .expect("static regex")
    })
}

/// Top-level packages a Python file imports.
fn python_imports(source: &str) -> HashSet<String> {
    let mut imports = HashSet::new();
    for caps in python_import().captures_iter(source) {
        let modules = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        for module in modules.split(',') {
            if let Some(root) = module.trim().split('.').next().filter(|r| !r.is_empty()) {
                imports.insert(root.to_string());
            }
        }
    }
    imports
}

/// Package names a script imports; scoped packages keep their scope.
fn script_imports(source: &str) -> HashSet<String> {
    let mut imports = HashSet::new();
    for caps in script_import().captures_iter(source) {
        let Some(spec) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let spec = spec.as_str();
        if spec.starts_with('.') {
            continue;
        }
        let mut parts = spec.split('/');
        let package = match (parts.next(), parts.next()) {
            (Some(scope), Some(name)) if scope.starts_with('@') => format!("{scope}/{name}"),
            (Some(name), _) => name.to_string(),
            _ => continue,
        };
        imports.insert(package);
    }
    imports
}

pub struct TestTypeExtractor;

#[async_trait]
impl Extractor for TestTypeExtractor {
    fn name(&self) -> &'static str {
        "test_types"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        [
            (UNIT, "Unit"),
            (INTEGRATION, "Integration"),
            (E2E, "End-to-end"),
            (UNKNOWN, "Unclassified"),
        ]
        .into_iter()
        .map(|(name, title)| {
            MetricDescriptor::new(name, title)
                .merge(MergeRule::Latest)
                .chart("Test types")
                .chart_kind(ChartKind::Bar)
        })
        .collect()
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut counts = [0u64; 4];
        let mut classified = 0usize;
        for path in tree.list_files().await? {
            let Some(language) = Language::from_path(&path) else {
                continue;
            };
            if !is_test_file(&path) {
                continue;
            }
            let Some(source) = tree.read_to_string(&path).await? else {
                continue;
            };
            let Some(kind) = classify(language, &source) else {
                continue;
            };
            classified += 1;
            counts[kind as usize] += 1;
        }
        if classified == 0 {
            return Ok(Extraction::skipped("no Python or JavaScript test files"));
        }

        let samples = [UNIT, INTEGRATION, E2E, UNKNOWN]
            .into_iter()
            .zip(counts)
            .map(|(name, n)| MetricSample::numeric(name, revision, n as f64))
            .collect();
        Ok(Extraction::Samples(samples))
    }
}
