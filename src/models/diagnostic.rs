use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::site::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    TestFailure,
    CoverageGap,
    FlakyTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapType {
    Line,
    Branch,
    Function,
}

/// Uncovered region reported by the test service. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageGap {
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(rename = "type")]
    pub gap_type: GapType,
    #[serde(default)]
    pub suggestion: String,
}

impl CoverageGap {
    /// 0-based editor range; an inverted span collapses to its start line.
    pub fn range(&self) -> Range {
        let start = self.start_line.saturating_sub(1);
        let end = self.end_line.max(self.start_line).saturating_sub(1);
        Range::lines(start, end)
    }
}

/// Kind-specific metadata carried alongside a diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiagnosticDetail {
    TestFailure {
        test_id: String,
        stack: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },
    CoverageGap {
        gap_type: GapType,
        suggestion: String,
    },
    FlakyTest {
        test_id: String,
        failure_rate: f64,
        failures: u32,
        total_runs: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub kind: DiagnosticKind,
    pub range: Range,
    pub message: String,
    pub severity: Severity,
    pub detail: DiagnosticDetail,
}
