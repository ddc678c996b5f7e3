//! Static flakiness markers in test code: sleeps, randomness and wall-clock
//! reads.

use async_trait::async_trait;
use regex::Regex;

use super::files::is_test_file;
use super::{Extraction, Extractor, MetricDescriptor};
use crate::domain::{ExtractResult, MetricSample, RevisionRef};
use crate::source::RevisionTree;

pub const SLEEP: &str = "nondeterminism.sleep";
pub const RANDOM: &str = "nondeterminism.random";
pub const CLOCK: &str = "nondeterminism.clock";

pub struct NondeterminismExtractor {
    sleep: Regex,
    random: Regex,
    clock: Regex,
}

impl Default for NondeterminismExtractor {
    fn default() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("static regex");
        Self {
            sleep: re(
                r"\b(?:(?:time|asyncio|Thread|thread|tokio::time)(?:\.|::))?[sS]leep\s*\(|\bsetTimeout\s*\(",
            ),
            random: re(
                r"\bMath\.random\s*\(|\brandom\.\w+\s*\(|\b(?:random|randint)\s*\(|\brand::\w+|\bthread_rng\s*\(|\bnew\s+Random\s*\(",
            ),
            clock: re(
                r"\bdatetime\.(?:now|utcnow|today)\s*\(|\btime\.(?:time|Now)\s*\(|\bDate\.now\s*\(|\bnew\s+Date\s*\(\s*\)|\b(?:Utc|Local|Instant|SystemTime)::now\s*\(|\bSystem\.currentTimeMillis\s*\(",
            ),
        }
    }
}

impl NondeterminismExtractor {
    /// `(sleep, random, clock)` marker counts in one source.
    pub fn count(&self, source: &str) -> (u64, u64, u64) {
        (
            self.sleep.find_iter(source).count() as u64,
            self.random.find_iter(source).count() as u64,
            self.clock.find_iter(source).count() as u64,
        )
    }
}

#[async_trait]
impl Extractor for NondeterminismExtractor {
    fn name(&self) -> &'static str {
        "nondeterminism"
    }

    fn metrics(&self) -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor::new(SLEEP, "Sleeps in tests").chart("Nondeterminism markers"),
            MetricDescriptor::new(RANDOM, "Randomness in tests").chart("Nondeterminism markers"),
            MetricDescriptor::new(CLOCK, "Clock reads in tests").chart("Nondeterminism markers"),
        ]
    }

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction> {
        let (mut sleep, mut random, mut clock) = (0u64, 0u64, 0u64);
        let mut scanned = 0usize;
        for path in tree.list_files().await? {
            if !is_test_file(&path) {
                continue;
            }
            if let Some(source) = tree.read_to_string(&path).await? {
                let (s, r, c) = self.count(&source);
                sleep += s;
                random += r;
                clock += c;
                scanned += 1;
            }
        }
        if scanned == 0 {
            return Ok(Extraction::skipped("no test files"));
        }
        Ok(Extraction::Samples(vec![
            MetricSample::numeric(SLEEP, revision, sleep as f64),
            MetricSample::numeric(RANDOM, revision, random as f64),
            MetricSample::numeric(CLOCK, revision, clock as f64),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_markers() {
        let src = "\
import time, random
from datetime import datetime

def test_retry():
    time.sleep(0.5)
    value = random.choice([1, 2])
    n = randint(1, 6)
    started = datetime.now()
";
        assert_eq!(NondeterminismExtractor::default().count(src), (1, 2, 1));
    }

    #[test]
    fn test_js_and_rust_markers() {
        let x = NondeterminismExtractor::default();
        assert_eq!(
            x.count("await new Promise(r => setTimeout(r, 100));\nconst id = Math.random();\nconst t = Date.now();"),
            (1, 1, 1)
        );
        assert_eq!(
            x.count("std::thread::sleep(d);\nlet n: u8 = rand::random();\nlet t = Instant::now();"),
            (1, 1, 1)
        );
    }
}
