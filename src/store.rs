//! Process-lifetime cache of test results and coverage snapshots.
//!
//! The store is the single writer for test and coverage state. Every change
//! touching a file bumps that file's revision so derived per-document views
//! can tell when they are stale.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{
    CoverageReport, FileCoverage, FlakyTestRecord, MetricKind, TestRecord, TestStatus,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_REPORT_HISTORY: usize = 10;

/// Per-metric percentage change between the two most recent reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageTrend {
    pub lines: f64,
    pub branches: f64,
    pub functions: f64,
    pub statements: f64,
}

impl CoverageTrend {
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Lines => self.lines,
            MetricKind::Branches => self.branches,
            MetricKind::Functions => self.functions,
            MetricKind::Statements => self.statements,
        }
    }
}

#[derive(Debug)]
pub struct ResultStore {
    /// Insertion-ordered; replaced records keep their slot.
    tests: Vec<TestRecord>,
    by_id: HashMap<String, usize>,
    history: HashMap<String, VecDeque<TestRecord>>,
    history_limit: usize,
    file_coverage: HashMap<PathBuf, FileCoverage>,
    current_report: Option<CoverageReport>,
    /// Older reports, most recent last.
    previous_reports: VecDeque<CoverageReport>,
    report_history: usize,
    revisions: HashMap<PathBuf, u64>,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT, DEFAULT_REPORT_HISTORY)
    }
}

impl ResultStore {
    pub fn new(history_limit: usize, report_history: usize) -> Self {
        Self {
            tests: Vec::new(),
            by_id: HashMap::new(),
            history: HashMap::new(),
            history_limit: history_limit.max(1),
            file_coverage: HashMap::new(),
            current_report: None,
            previous_reports: VecDeque::new(),
            report_history,
            revisions: HashMap::new(),
        }
    }

    /// Insert or replace a record by id, and append it to that id's history.
    pub fn upsert_test(&mut self, record: TestRecord) {
        self.bump(&record.file);

        let history = self.history.entry(record.id.clone()).or_default();
        history.push_back(record.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }

        if let Some(slot) = self.by_id.get(&record.id).copied() {
            let previous = std::mem::replace(&mut self.tests[slot], record);
            // A test that moved files invalidates its old file too.
            if previous.file != self.tests[slot].file {
                self.bump(&previous.file);
            }
        } else {
            self.by_id.insert(record.id.clone(), self.tests.len());
            self.tests.push(record);
        }
    }

    pub fn replace_tests(&mut self, records: impl IntoIterator<Item = TestRecord>) {
        for record in records {
            self.upsert_test(record);
        }
    }

    /// Mark a known test as running without touching its history.
    pub fn mark_running(&mut self, id: &str) -> Option<&TestRecord> {
        let slot = *self.by_id.get(id)?;
        self.tests[slot].status = TestStatus::Running;
        let file = self.tests[slot].file.clone();
        self.bump(&file);
        Some(&self.tests[slot])
    }

    pub fn get(&self, id: &str) -> Option<&TestRecord> {
        self.by_id.get(id).map(|&slot| &self.tests[slot])
    }

    pub fn tests(&self) -> &[TestRecord] {
        &self.tests
    }

    pub fn tests_for_file<'a>(&'a self, file: &'a Path) -> impl Iterator<Item = &'a TestRecord> {
        self.tests.iter().filter(move |t| t.file == file)
    }

    /// Past runs of one test, oldest first.
    pub fn history(&self, id: &str) -> impl Iterator<Item = &TestRecord> {
        self.history.get(id).into_iter().flatten()
    }

    /// Install a new coverage report. Every file in it replaces the stored
    /// coverage for that file wholesale.
    pub fn set_coverage(&mut self, report: CoverageReport) {
        for (path, coverage) in &report.files {
            self.bump(path);
            self.file_coverage.insert(path.clone(), coverage.clone());
        }
        if let Some(previous) = self.current_report.replace(report) {
            self.previous_reports.push_back(previous);
            while self.previous_reports.len() > self.report_history {
                self.previous_reports.pop_front();
            }
        }
        debug!(files = self.file_coverage.len(), "coverage report installed");
    }

    pub fn set_file_coverage(&mut self, coverage: FileCoverage) {
        self.bump(&coverage.path);
        self.file_coverage.insert(coverage.path.clone(), coverage);
    }

    pub fn coverage_for(&self, path: &Path) -> Option<&FileCoverage> {
        self.file_coverage.get(path)
    }

    pub fn current_report(&self) -> Option<&CoverageReport> {
        self.current_report.as_ref()
    }

    /// Retained reports, oldest first, ending with the current one.
    pub fn report_history(&self) -> impl Iterator<Item = &CoverageReport> {
        self.previous_reports.iter().chain(self.current_report.iter())
    }

    pub fn coverage_trend(&self) -> Option<CoverageTrend> {
        let current = self.current_report.as_ref()?;
        let previous = self.previous_reports.back()?;
        let delta = |kind: MetricKind| {
            current.metrics.get(kind).percentage - previous.metrics.get(kind).percentage
        };
        Some(CoverageTrend {
            lines: delta(MetricKind::Lines),
            branches: delta(MetricKind::Branches),
            functions: delta(MetricKind::Functions),
            statements: delta(MetricKind::Statements),
        })
    }

    /// Tests whose retained history mixes passing and failing runs.
    pub fn flaky_from_history(&self) -> Vec<FlakyTestRecord> {
        self.tests
            .iter()
            .filter_map(|test| {
                let runs: Vec<_> = self
                    .history(&test.id)
                    .filter(|r| r.status.is_terminal())
                    .collect();
                let failures = runs
                    .iter()
                    .filter(|r| r.status == TestStatus::Failed)
                    .count();
                FlakyTestRecord::new(
                    test.id.clone(),
                    test.name.clone(),
                    test.file.clone(),
                    test.line,
                    failures as u32,
                    runs.len() as u32,
                )
                .ok()
            })
            .collect()
    }

    /// Revision counter for `path`; changes whenever tests or coverage for the
    /// file change.
    pub fn revision(&self, path: &Path) -> u64 {
        self.revisions.get(path).copied().unwrap_or(0)
    }

    /// Drop everything known about one file.
    pub fn invalidate_file(&mut self, path: &Path) {
        self.file_coverage.remove(path);
        let removed: Vec<String> = self
            .tests
            .iter()
            .filter(|t| t.file == path)
            .map(|t| t.id.clone())
            .collect();
        if !removed.is_empty() {
            self.tests.retain(|t| t.file != path);
            for id in &removed {
                self.history.remove(id);
            }
            self.reindex();
        }
        self.bump(path);
    }

    pub fn clear(&mut self) {
        let files: Vec<PathBuf> = self
            .tests
            .iter()
            .map(|t| t.file.clone())
            .chain(self.file_coverage.keys().cloned())
            .collect();
        self.tests.clear();
        self.by_id.clear();
        self.history.clear();
        self.file_coverage.clear();
        self.current_report = None;
        self.previous_reports.clear();
        for file in files {
            self.bump(&file);
        }
    }

    fn reindex(&mut self) {
        self.by_id = self
            .tests
            .iter()
            .enumerate()
            .map(|(slot, t)| (t.id.clone(), slot))
            .collect();
    }

    fn bump(&mut self, path: &Path) {
        *self.revisions.entry(path.to_path_buf()).or_insert(0) += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{CoverageMetric, CoverageMetrics};

    pub(crate) fn record(id: &str, name: &str, file: &str, status: TestStatus) -> TestRecord {
        TestRecord {
            id: id.to_string(),
            name: name.to_string(),
            full_name: name.to_string(),
            status,
            duration: 5,
            file: PathBuf::from(file),
            line: 1,
            suite: Vec::new(),
            tags: Default::default(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            error: None,
        }
    }

    fn report(lines_covered: u64, files: &[&str]) -> CoverageReport {
        CoverageReport {
            metrics: CoverageMetrics {
                lines: CoverageMetric::new(100, lines_covered),
                ..Default::default()
            },
            files: files
                .iter()
                .map(|f| (PathBuf::from(f), FileCoverage::new(*f)))
                .collect::<BTreeMap<_, _>>(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut store = ResultStore::default();
        store.upsert_test(record("a", "first", "/a.ts", TestStatus::Passed));
        store.upsert_test(record("b", "second", "/a.ts", TestStatus::Passed));
        store.upsert_test(record("a", "first", "/a.ts", TestStatus::Failed));

        let ids: Vec<_> = store.tests().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().status, TestStatus::Failed);
    }

    #[test]
    fn history_is_bounded() {
        let mut store = ResultStore::default();
        for i in 0..15 {
            let status = if i % 2 == 0 {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            let mut r = record("a", "t", "/a.ts", status);
            r.duration = i;
            store.upsert_test(r);
        }
        let durations: Vec<u64> = store.history("a").map(|r| r.duration).collect();
        assert_eq!(durations, (5..15u64).collect::<Vec<_>>());
    }

    #[test]
    fn revision_changes_on_updates() {
        let mut store = ResultStore::default();
        let path = Path::new("/a.ts");
        let before = store.revision(path);
        store.upsert_test(record("a", "t", "/a.ts", TestStatus::Passed));
        let after_test = store.revision(path);
        store.set_file_coverage(FileCoverage::new("/a.ts"));
        let after_coverage = store.revision(path);

        assert!(after_test > before);
        assert!(after_coverage > after_test);
        assert_eq!(store.revision(Path::new("/other.ts")), 0);
    }

    #[test]
    fn report_ring_keeps_previous_reports() {
        let mut store = ResultStore::new(10, 2);
        for covered in [10, 20, 30, 40] {
            store.set_coverage(report(covered, &["/a.ts"]));
        }
        let seen: Vec<u64> = store
            .report_history()
            .map(|r| r.metrics.lines.covered)
            .collect();
        assert_eq!(seen, vec![20, 30, 40]);
        assert_eq!(store.coverage_trend().unwrap().lines, 10.0);
    }

    #[test]
    fn new_report_replaces_file_coverage_wholesale() {
        let mut store = ResultStore::default();
        let mut first = report(10, &["/a.ts"]);
        first
            .files
            .get_mut(Path::new("/a.ts"))
            .unwrap()
            .lines
            .insert(3, crate::models::LineHit { hits: 1, covered: true });
        store.set_coverage(first);
        store.set_coverage(report(20, &["/a.ts"]));

        assert!(store.coverage_for(Path::new("/a.ts")).unwrap().lines.is_empty());
    }

    #[test]
    fn detects_flaky_tests_from_history() {
        let mut store = ResultStore::default();
        for status in [TestStatus::Passed, TestStatus::Failed, TestStatus::Passed] {
            store.upsert_test(record("a", "flaky", "/a.ts", status));
        }
        for _ in 0..3 {
            store.upsert_test(record("b", "steady", "/a.ts", TestStatus::Passed));
        }
        let flaky = store.flaky_from_history();
        assert_eq!(flaky.len(), 1);
        assert_eq!(flaky[0].test_id, "a");
        assert_eq!(flaky[0].failures(), 1);
        assert_eq!(flaky[0].total_runs(), 3);
    }

    #[test]
    fn invalidate_file_drops_its_tests_and_coverage() {
        let mut store = ResultStore::default();
        store.upsert_test(record("a", "t", "/a.ts", TestStatus::Passed));
        store.upsert_test(record("b", "t", "/b.ts", TestStatus::Passed));
        store.set_file_coverage(FileCoverage::new("/a.ts"));

        store.invalidate_file(Path::new("/a.ts"));

        assert!(store.get("a").is_none());
        assert_eq!(store.get("b").unwrap().file, PathBuf::from("/b.ts"));
        assert!(store.coverage_for(Path::new("/a.ts")).is_none());
    }
}
