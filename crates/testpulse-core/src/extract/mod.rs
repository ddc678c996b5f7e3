//! Metric extractors.
//!
//! An [`Extractor`] reads one revision's tree and produces [`MetricSample`]s.
//! Extractors are registered in an [`ExtractorRegistry`], iterated in
//! registration order; that order also decides chart order in the report.

pub mod churn;
pub mod complexity;
pub mod coverage;
pub mod files;
pub mod functions_tested;
pub mod nondeterminism;
pub mod test_delay;
pub mod test_doubles;
pub mod test_files;
pub mod test_outcomes;
pub mod test_smells;
pub mod test_types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExtractResult, MetricSample, PulseError, Result, RevisionRef};
use crate::source::RevisionTree;

pub use churn::ChurnExtractor;
pub use complexity::ComplexityExtractor;
pub use coverage::CoverageExtractor;
pub use functions_tested::FunctionsTestedExtractor;
pub use nondeterminism::NondeterminismExtractor;
pub use test_delay::TestDelayExtractor;
pub use test_doubles::TestDoubleExtractor;
pub use test_files::TestFileExtractor;
pub use test_outcomes::TestOutcomeExtractor;
pub use test_smells::TestSmellExtractor;
pub use test_types::TestTypeExtractor;

/// How samples of one metric combine inside a time bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Arithmetic mean.
    #[default]
    Mean,
    /// Value of the chronologically latest revision.
    Latest,
    Sum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[default]
    Line,
    Bar,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
        }
    }
}

/// Static description of a metric an extractor emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    /// Dataset label in the report.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub merge: MergeRule,
    /// Metrics sharing a chart group are drawn on the same chart.
    pub chart: String,
    pub chart_kind: ChartKind,
}

impl MetricDescriptor {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            name: name.into(),
            chart: title.clone(),
            title,
            unit: None,
            merge: MergeRule::Mean,
            chart_kind: ChartKind::Line,
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn merge(mut self, merge: MergeRule) -> Self {
        self.merge = merge;
        self
    }

    pub fn chart(mut self, chart: impl Into<String>) -> Self {
        self.chart = chart.into();
        self
    }

    pub fn chart_kind(mut self, kind: ChartKind) -> Self {
        self.chart_kind = kind;
        self
    }
}

/// Outcome of one extractor against one revision.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Samples(Vec<MetricSample>),
    /// The tooling data this extractor needs is absent at this revision.
    Skipped { reason: String },
}

impl Extraction {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Produces metric samples from one revision's tree.
///
/// Implementations only read from `tree` and must return
/// [`Extraction::Skipped`] rather than an error when their input data simply
/// is not there.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &'static str;

    /// Metrics this extractor may emit, in chart order.
    fn metrics(&self) -> Vec<MetricDescriptor>;

    async fn extract(
        &self,
        revision: &RevisionRef,
        tree: &dyn RevisionTree,
    ) -> ExtractResult<Extraction>;
}

/// Ordered name -> extractor mapping.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in extractor.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Extractor>> = vec![
            Arc::new(CoverageExtractor),
            Arc::new(ComplexityExtractor),
            Arc::new(TestDoubleExtractor::default()),
            Arc::new(TestOutcomeExtractor),
            Arc::new(TestFileExtractor),
            Arc::new(TestSmellExtractor::default()),
            Arc::new(TestTypeExtractor),
            Arc::new(FunctionsTestedExtractor),
            Arc::new(TestDelayExtractor),
            Arc::new(ChurnExtractor),
            Arc::new(NondeterminismExtractor::default()),
        ];
        for extractor in builtins {
            // Built-in names are distinct.
            let _ = registry.register(extractor);
        }
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) -> Result<()> {
        let name = extractor.name();
        if self.get(name).is_some() {
            return Err(PulseError::DuplicateExtractor(name.to_string()));
        }
        self.extractors.push(extractor);
        Ok(())
    }

    pub fn with(mut self, extractor: Arc<dyn Extractor>) -> Result<Self> {
        self.register(extractor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Extractor>> {
        self.extractors.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Descriptors of every registered metric, in registration order.
    pub fn catalog(&self) -> MetricCatalog {
        MetricCatalog::new(self.extractors.iter().flat_map(|e| e.metrics()).collect())
    }
}

/// Ordered metric descriptors with name lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricCatalog {
    descriptors: Vec<MetricDescriptor>,
    index: HashMap<String, usize>,
}

impl MetricCatalog {
    /// Later duplicates of a name are ignored.
    pub fn new(descriptors: Vec<MetricDescriptor>) -> Self {
        let mut catalog = Self::default();
        for descriptor in descriptors {
            if catalog.index.contains_key(&descriptor.name) {
                continue;
            }
            catalog
                .index
                .insert(descriptor.name.clone(), catalog.descriptors.len());
            catalog.descriptors.push(descriptor);
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<&MetricDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Merge rule for `name`; unknown metrics merge by mean.
    pub fn merge_rule(&self, name: &str) -> MergeRule {
        self.get(name).map(|d| d.merge).unwrap_or_default()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn descriptors(&self) -> &[MetricDescriptor] {
        &self.descriptors
    }
}
