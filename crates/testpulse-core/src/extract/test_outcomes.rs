//! Recorded test runs: JUnit XML and pytest-json-report files.
//!
//! Emits one outcome sample per test case plus per-revision totals. This is
//! the only extractor whose output reaches the flakiness detector.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{
    ExtractError, ExtractResult, MetricSample, RevisionRef, TestOutcome, TestOutcomeRecord,
};
use crate::source::RevisionTree;

pub const TOTAL: &str = "tests.total";
pub const FAILED: &str = "tests.failed";
pub const PASS_RATE: &str = "tests.pass_rate";

const REPORT_DIRS: &[&str] = &["test-results", "test-reports"];

pub struct TestOutcomeExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Junit,
    PytestJson,
}

fn report_format(path: &str) -> Option<ReportFormat> {
    let mut components: Vec<&str> = path.split('/').collect();
    let name = components.pop()?;
    if name == ".report.json" || name == "report.json" {
        return Some(ReportFormat::PytestJson);
    }
    if !name.ends_with(".xml") {
        return None;
    }
    let junit_name =
        name.starts_with("junit") || name.starts_with("TEST-") || name.ends_with(".junit.xml");
    let in_report_dir = components.iter().any(|c| REPORT_DIRS.contains(c));
    (junit_name || in_report_dir).then_some(ReportFormat::Junit)
}

#[async_trait]
impl Extractor for TestOutcomeExtractor {
    fn name(&self) -> &'static str {
        "test_outcomes"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(TOTAL, "Tests executed")
                .merge(MergeRule::Latest)
                .chart("Test runs"),
            MetricDescriptor::new(FAILED, "Tests failing")
                .merge(MergeRule::Latest)
                .chart("Test runs"),
            MetricDescriptor::new(PASS_RATE, "Pass rate")
                .unit("%")
                .chart("Pass rate"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut outcomes: Vec<(String, TestOutcome)> = Vec::new();
        let mut reports = 0usize;

        for path in tree.list_files().await? {
            let Some(format) = report_format(&path) else {
                continue;
            };
            let Some(text) = tree.read_to_string(&path).await? else {
                continue;
            };
            match format {
                ReportFormat::Junit => {
                    // Other XML under a report directory is not ours to parse.
                    if !text.contains("<testsuite") && !text.contains("<testcase") {
                        continue;
                    }
                    outcomes.extend(parse_junit(&text));
                }
                ReportFormat::PytestJson => outcomes.extend(parse_pytest_json(&path, &text)?),
            }
            reports += 1;
        }

        if reports == 0 {
            return Ok(Extraction::skipped("no recorded test runs"));
        }
        if outcomes.is_empty() {
            return Ok(Extraction::skipped("recorded test runs contain no test cases"));
        }

        let total = outcomes.len();
        let failed = outcomes.iter().filter(|(_, o)| o.is_failure()).count();
        let passed = outcomes
            .iter()
            .filter(|(_, o)| *o == TestOutcome::Pass)
            .count();

        let mut samples = vec![
            MetricSample::numeric(TOTAL, revision, total as f64),
            MetricSample::numeric(FAILED, revision, failed as f64),
        ];
        if passed + failed > 0 {
            let rate = passed as f64 / (passed + failed) as f64 * 100.0;
            samples.push(MetricSample::numeric(PASS_RATE, revision, rate));
        }
        samples.extend(outcomes.into_iter().map(|(test_id, outcome)| {
            MetricSample::outcome(TestOutcomeRecord {
                test_id,
                revision: revision.clone(),
                outcome,
            })
        }));
        Ok(Extraction::Samples(samples))
    }
}

fn testcase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Quoted attribute values may contain `>` and `/`.
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<testcase\b((?:[^>"']|"[^"]*"|'[^']*')*?)(?:/>|>(.*?)</testcase>)"#)
            .expect("static regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([\w:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
    })
}

fn unescape_xml(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Every `<testcase>` as `(classname.name, outcome)`.
pub(crate) fn parse_junit(xml: &str) -> Vec<(String, TestOutcome)> {
    testcase_re()
        .captures_iter(xml)
        .filter_map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let mut name = None;
            let mut classname = None;
            for a in attr_re().captures_iter(attrs) {
                let value = a.get(2).or_else(|| a.get(3)).map_or("", |m| m.as_str());
                match &a[1] {
                    "name" => name = Some(unescape_xml(value)),
                    "classname" => classname = Some(unescape_xml(value)),
                    _ => {}
                }
            }
            let name = name?;
            let test_id = match classname.filter(|c| !c.is_empty()) {
                Some(class) => format!("{class}.{name}"),
                None => name,
            };
            let body = caps.get(2).map_or("", |m| m.as_str());
            let outcome = if body.contains("<failure") {
                TestOutcome::Fail
            } else if body.contains("<error") {
                TestOutcome::Error
            } else if body.contains("<skipped") {
                TestOutcome::Skip
            } else {
                TestOutcome::Pass
            };
            Some((test_id, outcome))
        })
        .collect()
}

#[derive(Deserialize)]
struct PytestReport {
    #[serde(default)]
    tests: Vec<PytestCase>,
}

#[derive(Deserialize)]
struct PytestCase {
    nodeid: String,
    outcome: String,
}

pub(crate) fn parse_pytest_json(
    path: &str,
    text: &str,
) -> ExtractResult<Vec<(String, TestOutcome)>> {
    let report: PytestReport = serde_json::from_str(text).map_err(|e| ExtractError::Malformed {
        format: "pytest-json-report",
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(report
        .tests
        .into_iter()
        .filter_map(|case| {
            let outcome = match case.outcome.as_str() {
                "passed" | "xpassed" => TestOutcome::Pass,
                "failed" => TestOutcome::Fail,
                "error" => TestOutcome::Error,
                "skipped" | "xfailed" => TestOutcome::Skip,
                _ => return None,
            };
            Some((case.nodeid, outcome))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TEST_OUTCOME_METRIC;
    use crate::source::MemoryTree;
    use chrono::Utc;

    const JUNIT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites>
  <testsuite name="pytest" tests="4" failures="1" errors="1" skipped="1">
    <testcase classname="tests.test_api" name="test_get" time="0.01" />
    <testcase classname="tests.test_api" name="test_post" time="0.02">
      <failure message="assert 500 == 200">AssertionError</failure>
    </testcase>
    <testcase classname="tests.test_db" name="test_conn&amp;retry" time="0.0">
      <error message="fixture failed"/>
    </testcase>
    <testcase classname="tests.test_db" name="test_slow">
      <skipped message="slow"/>
    </testcase>
  </testsuite>
</testsuites>"#;

    #[test]
    fn test_report_file_detection() {
        assert_eq!(report_format("junit.xml"), Some(ReportFormat::Junit));
        assert_eq!(report_format("build/TEST-com.acme.AppTest.xml"), Some(ReportFormat::Junit));
        assert_eq!(report_format("out/unit.junit.xml"), Some(ReportFormat::Junit));
        assert_eq!(report_format("test-results/any.xml"), Some(ReportFormat::Junit));
        assert_eq!(report_format(".report.json"), Some(ReportFormat::PytestJson));
        assert_eq!(report_format("pom.xml"), None);
        assert_eq!(report_format("package.json"), None);
    }

    #[test]
    fn test_parse_junit_outcomes() {
        let cases = parse_junit(JUNIT);
        assert_eq!(
            cases,
            vec![
                ("tests.test_api.test_get".to_string(), TestOutcome::Pass),
                ("tests.test_api.test_post".to_string(), TestOutcome::Fail),
                ("tests.test_db.test_conn&retry".to_string(), TestOutcome::Error),
                ("tests.test_db.test_slow".to_string(), TestOutcome::Skip),
            ]
        );
    }

    #[test]
    fn test_parse_junit_attribute_values_with_markup_characters() {
        let xml = r#"<testsuite>
  <testcase classname="cmp" name="a > b" />
  <testcase classname="cmp" name='path/to/>' time="0.1"><failure message="x > y"/></testcase>
  <testcase classname="cmp" name="x/y"><skipped/></testcase>
</testsuite>"#;
        assert_eq!(
            parse_junit(xml),
            vec![
                ("cmp.a > b".to_string(), TestOutcome::Pass),
                ("cmp.path/to/>".to_string(), TestOutcome::Fail),
                ("cmp.x/y".to_string(), TestOutcome::Skip),
            ]
        );
    }

    #[test]
    fn test_parse_pytest_json() {
        let json = r#"{"created": 1.0, "tests": [
            {"nodeid": "tests/test_a.py::test_one", "outcome": "passed"},
            {"nodeid": "tests/test_a.py::test_two", "outcome": "failed"},
            {"nodeid": "tests/test_a.py::test_three", "outcome": "xfailed"}
        ]}"#;
        let cases = parse_pytest_json(".report.json", json).unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[1].1, TestOutcome::Fail);
        assert_eq!(cases[2].1, TestOutcome::Skip);

        assert!(matches!(
            parse_pytest_json(".report.json", "{not json"),
            Err(ExtractError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_totals_and_outcomes() {
        let tree = MemoryTree::new()
            .with_file("reports/junit.xml", JUNIT)
            .with_file("test-results/coverage-config.xml", "<config/>");
        let rev = RevisionRef::new("r1", Utc::now(), Some("main".into()));
        let Extraction::Samples(samples) = TestOutcomeExtractor.extract(&rev, &tree).await.unwrap()
        else {
            panic!("expected samples");
        };

        let value = |name: &str| {
            samples
                .iter()
                .find(|s| s.metric == name)
                .and_then(|s| s.value.as_f64())
        };
        assert_eq!(value(TOTAL), Some(4.0));
        assert_eq!(value(FAILED), Some(2.0));
        assert!((value(PASS_RATE).unwrap() - 100.0 / 3.0).abs() < 1e-9);

        let records: Vec<TestOutcomeRecord> =
            samples.iter().filter_map(MetricSample::as_outcome).collect();
        assert_eq!(records.len(), 4);
        assert!(samples
            .iter()
            .filter(|s| s.test_id.is_some())
            .all(|s| s.metric == TEST_OUTCOME_METRIC));
    }

    #[tokio::test]
    async fn test_no_reports_is_skipped() {
        let tree = MemoryTree::new().with_file("tests/test_a.py", "def test_a(): pass");
        let rev = RevisionRef::new("r1", Utc::now(), None);
        let extraction = TestOutcomeExtractor.extract(&rev, &tree).await.unwrap();
        assert!(matches!(extraction, Extraction::Skipped { .. }));
    }
}
