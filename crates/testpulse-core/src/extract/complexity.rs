//! Mean cyclomatic complexity per function.
//!
//! A lexical approximation: every function starts at 1 and gains one per
//! decision point (branch keyword or short-circuit operator) in its own body.
//! Nested functions are scored separately from their parent. Python bodies are
//! scoped by indentation; the other languages by braces.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::files::{is_test_file, Language};
use super::{Extraction, Extractor, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const PRODUCTION: &str = "complexity.production";
pub const TESTS: &str = "complexity.tests";

pub struct ComplexityExtractor;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Tally {
    functions: u64,
    complexity: u64,
}

impl Tally {
    fn add(&mut self, scores: &[u64]) {
        self.functions += scores.len() as u64;
        self.complexity += scores.iter().sum::<u64>();
    }

    fn mean(&self) -> Option<f64> {
        (self.functions > 0).then(|| self.complexity as f64 / self.functions as f64)
    }
}

#[async_trait]
impl Extractor for ComplexityExtractor {
    fn name(&self) -> &'static str {
        "complexity"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(PRODUCTION, "Production code").chart("Cyclomatic complexity"),
            MetricDescriptor::new(TESTS, "Test code").chart("Cyclomatic complexity"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let mut production = Tally::default();
        let mut tests = Tally::default();

        for path in tree.list_files().await? {
            let Some(language) = Language::from_path(&path) else {
                continue;
            };
            let Some(source) = tree.read_to_string(&path).await? else {
                continue;
            };
            let scores = function_complexities(language, &source);
            if is_test_file(&path) {
                tests.add(&scores);
            } else {
                production.add(&scores);
            }
        }

        let mut samples = Vec::new();
        if let Some(mean) = production.mean() {
            samples.push(MetricSample::numeric(PRODUCTION, revision, mean));
        }
        if let Some(mean) = tests.mean() {
            samples.push(MetricSample::numeric(TESTS, revision, mean));
        }
        if samples.is_empty() {
            return Ok(Extraction::skipped("no functions in analyzable source files"));
        }
        Ok(Extraction::Samples(samples))
    }
}

/// Complexity of every function in `source`, in order of appearance.
pub(crate) fn function_complexities(language: Language, source: &str) -> Vec<u64> {
    if language.uses_braces() {
        brace_complexities(language, source)
    } else {
        python_complexities(source)
    }
}

fn python_decisions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(if|elif|for|while|except|and|or|case)\b").expect("static regex")
    })
}

fn python_def() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(async\s+)?def\s+\w+").expect("static regex"))
}

fn string_literals() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`"#).expect("static regex")
    })
}

fn python_complexities(source: &str) -> Vec<u64> {
    let mut scores: Vec<u64> = Vec::new();
    // (indent of the def line, index into scores)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for raw in source.lines() {
        let code = raw.split('#').next().unwrap_or("");
        let trimmed = code.trim_start();
        if trimmed.trim().is_empty() {
            continue;
        }
        let indent = code.len() - trimmed.len();
        while stack.last().is_some_and(|(i, _)| indent <= *i) {
            stack.pop();
        }
        if python_def().is_match(trimmed) {
            scores.push(1);
            stack.push((indent, scores.len() - 1));
            continue;
        }
        if let Some(&(_, idx)) = stack.last() {
            let code = string_literals().replace_all(trimmed, "\"\"");
            scores[idx] += python_decisions().find_iter(&code).count() as u64;
        }
    }
    scores
}

fn brace_decisions(language: Language) -> &'static Regex {
    static RUST: OnceLock<Regex> = OnceLock::new();
    static OTHER: OnceLock<Regex> = OnceLock::new();
    match language {
        // Match arms count as paths in Rust.
        Language::Rust => RUST.get_or_init(|| {
            Regex::new(r"\b(if|for|while)\b|&&|\|\||=>").expect("static regex")
        }),
        _ => OTHER.get_or_init(|| {
            Regex::new(r"\b(if|for|while|case|catch)\b|&&|\|\|").expect("static regex")
        }),
    }
}

fn function_header(language: Language) -> &'static Regex {
    static RUST: OnceLock<Regex> = OnceLock::new();
    static GO: OnceLock<Regex> = OnceLock::new();
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static JAVA: OnceLock<Regex> = OnceLock::new();
    match language {
        Language::Rust => RUST.get_or_init(|| Regex::new(r"\bfn\s+\w+").expect("static regex")),
        Language::Go => GO.get_or_init(|| Regex::new(r"^\s*func\b").expect("static regex")),
        Language::Java => JAVA.get_or_init(|| {
            Regex::new(r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized)\s+)*[\w<>\[\],.?\s]+\s+(\w+)\s*\([^;]*$")
                .expect("static regex")
        }),
        _ => SCRIPT.get_or_init(|| {
            Regex::new(r"\bfunction\b|=>\s*\{|^\s*(?:async\s+)?(\w+)\s*\([^)]*\)\s*\{").expect("static regex")
        }),
    }
}

const CONTROL_WORDS: &[&str] = &["if", "for", "while", "switch", "catch", "return", "else", "new"];

fn is_function_header(language: Language, code: &str) -> bool {
    let Some(caps) = function_header(language).captures(code) else {
        return false;
    };
    match caps.get(1) {
        Some(name) => !CONTROL_WORDS.contains(&name.as_str()),
        None => true,
    }
}

/// Drop string contents and comments from one line.
fn strip_line(language: Language, line: &str, in_block_comment: &mut bool) -> String {
    let mut rest = line;
    let mut out = String::new();
    loop {
        if *in_block_comment {
            match rest.find("*/") {
                Some(end) => {
                    *in_block_comment = false;
                    rest = &rest[end + 2..];
                }
                None => return out,
            }
        }
        match rest.find("/*") {
            Some(start) => {
                out.push_str(&rest[..start]);
                *in_block_comment = true;
                rest = &rest[start + 2..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    let code = match out.find("//") {
        Some(i) => out[..i].to_string(),
        None => out,
    };
    if language == Language::Rust {
        // Single quotes in Rust are mostly lifetimes.
        code.split('"')
            .step_by(2)
            .collect::<Vec<_>>()
            .join("\"\"")
    } else {
        string_literals().replace_all(&code, "\"\"").into_owned()
    }
}

fn brace_complexities(language: Language, source: &str) -> Vec<u64> {
    let mut scores: Vec<u64> = Vec::new();
    // (brace depth at which the body opened, index into scores)
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut pending: Option<usize> = None;
    let mut in_block_comment = false;

    for raw in source.lines() {
        let code = strip_line(language, raw, &mut in_block_comment);
        if code.trim().is_empty() {
            continue;
        }
        if pending.is_none() && is_function_header(language, &code) {
            scores.push(1);
            pending = Some(scores.len() - 1);
        }
        let decisions = brace_decisions(language).find_iter(&code).count() as u64;
        let mut owner = stack.last().map(|(_, idx)| *idx);

        for ch in code.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    if let Some(idx) = pending.take() {
                        stack.push((depth, idx));
                        owner = Some(idx);
                    }
                }
                '}' => {
                    if stack.last().is_some_and(|(d, _)| *d == depth) {
                        stack.pop();
                    }
                    depth = depth.saturating_sub(1);
                }
                // A declaration without a body, such as an interface method.
                ';' if pending.is_some() && !code.contains('{') => {
                    pending = None;
                    scores.pop();
                }
                _ => {}
            }
        }
        if let Some(idx) = owner {
            scores[idx] += decisions;
        }
    }
    scores
}
