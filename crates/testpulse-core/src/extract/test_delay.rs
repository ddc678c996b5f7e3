//! Days between a production file's creation and the creation of its test.
//!
//! A test file pairs with production code by file name: `test_app.py`,
//! `app_test.py`, `app.test.ts`, `app.spec.ts` and `app_spec.rb` all test
//! `app.*` with the same extension. When several production files share
//! that name, the one added first wins. Pairs whose test predates the
//! production file are ignored.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::files::{is_source_file, is_test_file};
use super::{Extraction, Extractor, MergeRule, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const AVG_DAYS: &str = "test_delay.avg_days";
pub const PAIRS: &str = "test_delay.pairs";

pub struct TestDelayExtractor;

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name of the production file a test file name targets.
pub fn production_name(test_name: &str) -> Option<String> {
    if let Some(rest) = test_name.strip_prefix("test_") {
        return (!rest.is_empty()).then(|| rest.to_string());
    }
    let (stem, ext) = test_name.split_once('.')?;
    for suffix in ["_test", "_spec"] {
        if let Some(base) = stem.strip_suffix(suffix).filter(|b| !b.is_empty()) {
            return Some(format!("{base}.{ext}"));
        }
    }
    for marker in ["test.", "spec."] {
        if let Some(rest) = ext.strip_prefix(marker).filter(|r| !r.is_empty()) {
            return Some(format!("{stem}.{rest}"));
        }
    }
    None
}

#[async_trait]
impl Extractor for TestDelayExtractor {
    fn name(&self) -> &'static str {
        "test_delay"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(AVG_DAYS, "Days until first test")
                .unit("days")
                .chart("Test delay"),
            MetricDescriptor::new(PAIRS, "Paired test files")
                .merge(MergeRule::Latest)
                .chart("Paired test files"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let Some(history) = tree.first_added().await? else {
            return Ok(Extraction::skipped("no file history"));
        };

        let mut production: HashMap<&str, (DateTime<Utc>, &str)> = HashMap::new();
        let mut tests: Vec<(&str, DateTime<Utc>)> = Vec::new();
        let files = tree.list_files().await?;
        for path in &files {
            if !is_source_file(path) {
                continue;
            }
            let Some(&added) = history.get(path.as_str()) else {
                continue;
            };
            if is_test_file(path) {
                tests.push((path.as_str(), added));
                continue;
            }
            let earliest = production.entry(file_name(path)).or_insert((added, path.as_str()));
            if (added, path.as_str()) < *earliest {
                *earliest = (added, path.as_str());
            }
        }

        let delays: Vec<i64> = tests
            .iter()
            .filter_map(|(path, test_added)| {
                let target = production_name(file_name(path))?;
                let (prod_added, _) = production.get(target.as_str())?;
                (test_added >= prod_added).then(|| (*test_added - *prod_added).num_days())
            })
            .collect();
        if delays.is_empty() {
            return Ok(Extraction::skipped("no test files paired with production files"));
        }

        let avg = delays.iter().sum::<i64>() as f64 / delays.len() as f64;
        Ok(Extraction::Samples(vec![
            MetricSample::numeric(AVG_DAYS, revision, (avg * 100.0).round() / 100.0),
            MetricSample::numeric(PAIRS, revision, delays.len() as f64),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FirstAdded, MemoryTree};
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_production_names() {
        assert_eq!(production_name("test_app.py").as_deref(), Some("app.py"));
        assert_eq!(production_name("parser_test.go").as_deref(), Some("parser.go"));
        assert_eq!(production_name("user_spec.rb").as_deref(), Some("user.rb"));
        assert_eq!(production_name("button.test.tsx").as_deref(), Some("button.tsx"));
        assert_eq!(production_name("button.spec.ts").as_deref(), Some("button.ts"));
        assert_eq!(production_name("helpers.py"), None);
        assert_eq!(production_name("test_"), None);
    }

    #[tokio::test]
    async fn test_average_delay_over_pairs() {
        let history: FirstAdded = [
            ("src/app.py", day(1)),
            ("tests/test_app.py", day(4)),
            ("lib/app.py", day(2)),
            ("src/cli.py", day(3)),
            ("tests/test_cli.py", day(10)),
            ("src/late.py", day(20)),
            ("tests/test_late.py", day(5)),
            ("tests/test_orphan.py", day(6)),
        ]
        .into_iter()
        .map(|(p, t)| (p.to_string(), t))
        .collect();
        let mut tree = MemoryTree::new().with_first_added(history.clone());
        for path in history.keys() {
            tree = tree.with_file(path.as_str(), "\n");
        }
        let rev = RevisionRef::new("r1", day(20), None);
        let Extraction::Samples(samples) = TestDelayExtractor.extract(&rev, &tree).await.unwrap()
        else {
            panic!("expected samples");
        };
        // app: 3 days against src/app.py, cli: 7 days; late predates its code.
        assert_eq!(samples[0].value.as_f64(), Some(5.0));
        assert_eq!(samples[1].value.as_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_without_history_is_skipped() {
        let tree = MemoryTree::new()
            .with_file("src/app.py", "\n")
            .with_file("tests/test_app.py", "\n");
        let rev = RevisionRef::new("r1", day(1), None);
        let extraction = TestDelayExtractor.extract(&rev, &tree).await.unwrap();
        assert!(matches!(extraction, Extraction::Skipped { .. }));
    }
}
