//! Per-file diagnostics merged from three independent sources.
//!
//! Each file owns one bucket per [`DiagnosticKind`]. Writers only ever touch
//! their own bucket, so replacing coverage gaps cannot disturb failure or
//! flaky-test markers for the same file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{
    CoverageGap, DiagnosticDetail, DiagnosticKind, DiagnosticRecord, FlakyTestRecord, GapType,
    Range, Severity, TestRecord, TestStatus,
};

#[derive(Debug, Default, Clone)]
struct FileBuckets {
    failures: Vec<DiagnosticRecord>,
    gaps: Vec<DiagnosticRecord>,
    flaky: Vec<DiagnosticRecord>,
}

impl FileBuckets {
    fn bucket_mut(&mut self, kind: DiagnosticKind) -> &mut Vec<DiagnosticRecord> {
        match kind {
            DiagnosticKind::TestFailure => &mut self.failures,
            DiagnosticKind::CoverageGap => &mut self.gaps,
            DiagnosticKind::FlakyTest => &mut self.flaky,
        }
    }

    fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.gaps.is_empty() && self.flaky.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DiagnosticsAggregator {
    files: BTreeMap<PathBuf, FileBuckets>,
}

impl DiagnosticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failure marker for a failed test. Non-failed tests are ignored.
    pub fn upsert_failure(&mut self, test: &TestRecord) {
        if test.status != TestStatus::Failed {
            return;
        }
        let error = test.error.as_ref();
        let message = error
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Test failed: {}", test.name));
        let record = DiagnosticRecord {
            kind: DiagnosticKind::TestFailure,
            range: Range::line(test.zero_based_line()),
            message,
            severity: Severity::Error,
            detail: DiagnosticDetail::TestFailure {
                test_id: test.id.clone(),
                stack: error.and_then(|e| e.stack.clone()),
                expected: error.and_then(|e| e.expected.clone()),
                actual: error.and_then(|e| e.actual.clone()),
            },
        };
        self.files
            .entry(test.file.clone())
            .or_default()
            .failures
            .push(record);
    }

    /// Remove this test's failure markers sitting on its current line. Other
    /// tests sharing the line (e.g. table-driven rows) keep theirs.
    pub fn clear_failure(&mut self, test: &TestRecord) {
        let line = test.zero_based_line();
        if let Some(buckets) = self.files.get_mut(&test.file) {
            buckets.failures.retain(|d| {
                let same_test = matches!(
                    &d.detail,
                    DiagnosticDetail::TestFailure { test_id, .. } if *test_id == test.id
                );
                !(same_test && d.range.start.line == line)
            });
        }
        self.prune(&test.file);
    }

    /// Replace every file's gap bucket with the contents of `gaps`. Files
    /// missing from the new list end up with no gap markers.
    pub fn replace_gaps(&mut self, gaps: &[CoverageGap]) {
        for buckets in self.files.values_mut() {
            buckets.gaps.clear();
        }
        for gap in gaps {
            let severity = match gap.gap_type {
                GapType::Function => Severity::Warning,
                GapType::Line | GapType::Branch => Severity::Information,
            };
            let message = if gap.suggestion.is_empty() {
                format!("Uncovered {}", gap_label(gap.gap_type))
            } else {
                format!("Uncovered {}: {}", gap_label(gap.gap_type), gap.suggestion)
            };
            self.files
                .entry(gap.file.clone())
                .or_default()
                .gaps
                .push(DiagnosticRecord {
                    kind: DiagnosticKind::CoverageGap,
                    range: gap.range(),
                    message,
                    severity,
                    detail: DiagnosticDetail::CoverageGap {
                        gap_type: gap.gap_type,
                        suggestion: gap.suggestion.clone(),
                    },
                });
        }
        self.files.retain(|_, b| !b.is_empty());
        debug!(gaps = gaps.len(), "coverage gap diagnostics replaced");
    }

    /// Flaky markers persist until the file or everything is cleared.
    pub fn upsert_flaky(&mut self, record: &FlakyTestRecord) {
        let rate = record.failure_rate();
        self.files
            .entry(record.file.clone())
            .or_default()
            .flaky
            .push(DiagnosticRecord {
                kind: DiagnosticKind::FlakyTest,
                range: Range::line(record.line.saturating_sub(1)),
                message: format!(
                    "Flaky test '{}': failed {} of {} runs ({:.0}%)",
                    record.test_name,
                    record.failures(),
                    record.total_runs(),
                    rate * 100.0
                ),
                severity: Severity::Warning,
                detail: DiagnosticDetail::FlakyTest {
                    test_id: record.test_id.clone(),
                    failure_rate: rate,
                    failures: record.failures(),
                    total_runs: record.total_runs(),
                },
            });
    }

    /// Failures, then gaps, then flaky markers for `file`.
    pub fn merge(&self, file: &Path) -> Vec<DiagnosticRecord> {
        self.files
            .get(file)
            .map(|b| {
                b.failures
                    .iter()
                    .chain(&b.gaps)
                    .chain(&b.flaky)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear_bucket(&mut self, file: &Path, kind: DiagnosticKind) {
        if let Some(buckets) = self.files.get_mut(file) {
            buckets.bucket_mut(kind).clear();
        }
        self.prune(file);
    }

    pub fn clear_file(&mut self, file: &Path) {
        self.files.remove(file);
    }

    pub fn clear_all(&mut self) {
        self.files.clear();
    }

    /// Files that currently carry at least one diagnostic.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    fn prune(&mut self, file: &Path) {
        if self.files.get(file).is_some_and(FileBuckets::is_empty) {
            self.files.remove(file);
        }
    }
}

fn gap_label(gap_type: GapType) -> &'static str {
    match gap_type {
        GapType::Line => "lines",
        GapType::Branch => "branch",
        GapType::Function => "function",
    }
}
