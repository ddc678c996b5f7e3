//! Coverage reports committed alongside the code.
//!
//! Formats, in precedence order:
//! 1. Cobertura XML (`coverage.xml`, `cobertura.xml`, `cobertura-coverage.xml`)
//! 2. lcov (`lcov.info`)
//! 3. Istanbul summary (`coverage-summary.json`)

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Extraction, Extractor, MetricDescriptor};
use crate::domain::{ExtractError, ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const LINE_PCT: &str = "coverage.line_pct";
pub const BRANCH_PCT: &str = "coverage.branch_pct";

const COBERTURA_NAMES: &[&str] = &["coverage.xml", "cobertura.xml", "cobertura-coverage.xml"];
const LCOV_NAME: &str = "lcov.info";
const ISTANBUL_NAME: &str = "coverage-summary.json";

#[derive(Debug, Clone, Copy, PartialEq)]
struct Coverage {
    line_pct: f64,
    branch_pct: Option<f64>,
}

pub struct CoverageExtractor;

#[async_trait]
impl Extractor for CoverageExtractor {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(LINE_PCT, "Line coverage")
                .unit("%")
                .chart("Coverage"),
            MetricDescriptor::new(BRANCH_PCT, "Branch coverage")
                .unit("%")
                .chart("Coverage"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let files = tree.list_files().await?;

        let coverage = if let Some(path) = find_report(&files, COBERTURA_NAMES) {
            Some(parse_cobertura(path, &read(tree, path).await?)?)
        } else if let Some(path) = find_report(&files, &[LCOV_NAME]) {
            Some(parse_lcov(path, &read(tree, path).await?)?)
        } else if let Some(path) = find_report(&files, &[ISTANBUL_NAME]) {
            Some(parse_istanbul(path, &read(tree, path).await?)?)
        } else {
            None
        };

        let Some(coverage) = coverage else {
            return Ok(Extraction::skipped("no coverage report"));
        };
        let mut samples = vec![MetricSample::numeric(LINE_PCT, revision, coverage.line_pct)];
        if let Some(branch) = coverage.branch_pct {
            samples.push(MetricSample::numeric(BRANCH_PCT, revision, branch));
        }
        Ok(Extraction::Samples(samples))
    }
}

async fn read(tree: &dyn RevisionTree, path: &str) -> ExtractResult<String> {
    tree.read_to_string(path)
        .await?
        .ok_or_else(|| ExtractError::Other(format!("{path} vanished from the tree")))
}

/// Shallowest file whose name is in `names`, by name precedence first.
fn find_report<'a>(files: &'a [String], names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        files
            .iter()
            .filter(|f| f.rsplit('/').next() == Some(*name))
            .min_by_key(|f| (f.matches('/').count(), f.as_str()))
            .map(String::as_str)
    })
}

fn malformed(format: &'static str, path: &str, reason: impl Into<String>) -> ExtractError {
    ExtractError::Malformed {
        format,
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn cobertura_root() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<coverage\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#).expect("static regex")
    })
}

fn xml_attr(attrs: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r#"\b{}\s*=\s*["']([^"']*)["']"#, regex::escape(name))).ok()?;
    re.captures(attrs).map(|c| c[1].to_string())
}

fn parse_cobertura(path: &str, xml: &str) -> ExtractResult<Coverage> {
    let attrs = cobertura_root()
        .captures(xml)
        .map(|c| c[1].to_string())
        .ok_or_else(|| malformed("cobertura", path, "missing <coverage> element"))?;
    let rate = |name: &str| -> ExtractResult<Option<f64>> {
        match xml_attr(&attrs, name) {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(rate) if rate.is_finite() => Ok(Some(rate * 100.0)),
                _ => Err(malformed("cobertura", path, format!("bad {name} '{raw}'"))),
            },
            None => Ok(None),
        }
    };
    let line_pct = rate("line-rate")?
        .ok_or_else(|| malformed("cobertura", path, "missing line-rate"))?;
    let no_branches = xml_attr(&attrs, "branches-valid").as_deref() == Some("0");
    let branch_pct = if no_branches { None } else { rate("branch-rate")? };
    Ok(Coverage {
        line_pct,
        branch_pct,
    })
}

fn parse_lcov(path: &str, text: &str) -> ExtractResult<Coverage> {
    let (mut lh, mut lf, mut brh, mut brf) = (0u64, 0u64, 0u64, 0u64);
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let slot = match key {
            "LH" => &mut lh,
            "LF" => &mut lf,
            "BRH" => &mut brh,
            "BRF" => &mut brf,
            _ => continue,
        };
        *slot += value
            .trim()
            .parse::<u64>()
            .map_err(|_| malformed("lcov", path, format!("bad {key} value '{value}'")))?;
    }
    if lf == 0 {
        return Err(malformed("lcov", path, "no LF line totals"));
    }
    Ok(Coverage {
        line_pct: lh as f64 / lf as f64 * 100.0,
        branch_pct: (brf > 0).then(|| brh as f64 / brf as f64 * 100.0),
    })
}

fn parse_istanbul(path: &str, text: &str) -> ExtractResult<Coverage> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| malformed("istanbul", path, e.to_string()))?;
    let total = json
        .get("total")
        .ok_or_else(|| malformed("istanbul", path, "missing total"))?;
    let pct = |kind: &str| {
        total
            .get(kind)
            .and_then(|k| k.get("pct"))
            .and_then(|p| p.as_f64())
            .filter(|p| p.is_finite())
    };
    let line_pct =
        pct("lines").ok_or_else(|| malformed("istanbul", path, "missing total.lines.pct"))?;
    let has_branches = total
        .get("branches")
        .and_then(|b| b.get("total"))
        .and_then(|t| t.as_u64())
        .map_or(true, |t| t > 0);
    Ok(Coverage {
        line_pct,
        branch_pct: if has_branches { pct("branches") } else { None },
    })
}
