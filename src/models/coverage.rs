use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution counts for one coverage dimension. The percentage is always
/// derived from the counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "MetricCounts")]
pub struct CoverageMetric {
    pub total: u64,
    pub covered: u64,
    pub percentage: f64,
}

#[derive(Deserialize)]
struct MetricCounts {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    covered: u64,
}

impl From<MetricCounts> for CoverageMetric {
    fn from(counts: MetricCounts) -> Self {
        CoverageMetric::new(counts.total, counts.covered)
    }
}

impl Default for CoverageMetric {
    fn default() -> Self {
        CoverageMetric::new(0, 0)
    }
}

impl CoverageMetric {
    /// `covered` is clamped to `total`. An empty denominator counts as fully
    /// covered.
    pub fn new(total: u64, covered: u64) -> Self {
        let covered = covered.min(total);
        let percentage = if total > 0 {
            covered as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        Self {
            total,
            covered,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineHit {
    #[serde(default)]
    pub hits: u64,
    pub covered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHit {
    pub line: u32,
    pub branch: u32,
    pub taken: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHit {
    pub name: String,
    pub line: u32,
    #[serde(default)]
    pub hits: u64,
    pub covered: bool,
}

/// Coverage snapshot for a single source file. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: PathBuf,
    #[serde(default)]
    pub lines: BTreeMap<u32, LineHit>,
    #[serde(default)]
    pub branches: Vec<BranchHit>,
    #[serde(default)]
    pub functions: Vec<FunctionHit>,
    #[serde(default)]
    pub metrics: CoverageMetrics,
}

impl FileCoverage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Branch entries reported for `line`.
    pub fn branches_on(&self, line: u32) -> impl Iterator<Item = &BranchHit> {
        self.branches.iter().filter(move |b| b.line == line)
    }

    pub fn function_named(&self, name: &str) -> Option<&FunctionHit> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// The four standard metrics, shared by file and report level.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageMetrics {
    #[serde(default)]
    pub lines: CoverageMetric,
    #[serde(default)]
    pub branches: CoverageMetric,
    #[serde(default)]
    pub functions: CoverageMetric,
    #[serde(default)]
    pub statements: CoverageMetric,
}

impl CoverageMetrics {
    pub fn get(&self, kind: MetricKind) -> &CoverageMetric {
        match kind {
            MetricKind::Lines => &self.lines,
            MetricKind::Branches => &self.branches,
            MetricKind::Functions => &self.functions,
            MetricKind::Statements => &self.statements,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Lines,
    Branches,
    Functions,
    Statements,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Lines,
        MetricKind::Branches,
        MetricKind::Functions,
        MetricKind::Statements,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Lines => "lines",
            MetricKind::Branches => "branches",
            MetricKind::Functions => "functions",
            MetricKind::Statements => "statements",
        }
    }
}

/// Immutable snapshot of coverage across a set of files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(flatten)]
    pub metrics: CoverageMetrics,
    #[serde(default)]
    pub files: BTreeMap<PathBuf, FileCoverage>,
    pub timestamp: DateTime<Utc>,
}
