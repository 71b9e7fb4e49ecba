//! Owns every cache and wires scanning, correlation, overlays, diagnostics
//! and search to the test service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::correlate::{CorrelatedSite, correlate, site_label};
use crate::debounce::Debouncer;
use crate::diagnostics::DiagnosticsAggregator;
use crate::events::EventBus;
use crate::index::WorkspaceIndex;
use crate::models::{DiagnosticRecord, FlakyTestRecord, TestRecord, TestSite};
use crate::overlay::{
    CoverageThresholds, DecorationSet, ThresholdStatus, build_decorations, evaluate_thresholds,
    hover_for_line,
};
use crate::scanner;
use crate::service::{FlakyOptions, GeneratedTest, RunOptions, ServiceResult, TestService};
use crate::store::{CoverageTrend, ResultStore};

pub mod events;
pub mod notifier;

pub use events::{ServiceEvent, handle_service_event};
pub use notifier::{Notice, NoticeKind, Notifier};

/// Everything the editor shows for one open document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentView {
    pub sites: Vec<CorrelatedSite>,
    pub decorations: DecorationSet,
    /// File-level threshold check, present once coverage for the file is known.
    pub thresholds: Option<ThresholdStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ViewKey {
    revision: u64,
    generation: u64,
    line_count: u32,
}

#[derive(Debug)]
struct DocumentState {
    language: String,
    text: String,
    line_count: u32,
    sites: Vec<TestSite>,
    /// Bumped on every scan.
    generation: u64,
    view: Option<(ViewKey, DocumentView)>,
}

impl DocumentState {
    fn new(language: String, text: String) -> Self {
        let line_count = count_lines(&text);
        Self {
            language,
            text,
            line_count,
            sites: Vec::new(),
            generation: 0,
            view: None,
        }
    }

    fn scan(&mut self) {
        self.sites = scanner::scan(&self.text, &self.language);
        self.generation += 1;
        trace!(sites = self.sites.len(), generation = self.generation, "document scanned");
    }
}

/// Counts lines the way editors do: a trailing newline opens one more line.
fn count_lines(text: &str) -> u32 {
    text.split('\n').count() as u32
}

pub struct Engine {
    workspace: PathBuf,
    service: Arc<dyn TestService>,
    store: ResultStore,
    diagnostics: DiagnosticsAggregator,
    index: WorkspaceIndex,
    events: EventBus,
    documents: HashMap<PathBuf, DocumentState>,
    debouncer: Debouncer<PathBuf>,
    notifier: Notifier,
    thresholds: CoverageThresholds,
    ignore: Vec<glob::Pattern>,
}

impl Engine {
    /// Paths whose debounced rescan is due arrive on the returned receiver;
    /// feed them back through [`Engine::rescan`].
    pub fn new(
        workspace: PathBuf,
        config: &Config,
        service: Arc<dyn TestService>,
    ) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (debouncer, rescan_rx) = Debouncer::new(config.scanner.debounce());
        let ignore = config
            .scanner
            .ignore
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern, error = %e, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();

        let engine = Self {
            workspace,
            service,
            store: ResultStore::new(config.store.history_limit, config.store.report_history),
            diagnostics: DiagnosticsAggregator::new(),
            index: WorkspaceIndex::new(config.index.ttl(), config.index.max_results),
            events: EventBus::default(),
            documents: HashMap::new(),
            debouncer,
            notifier: Notifier::new(),
            thresholds: config.coverage,
            ignore,
        };
        (engine, rescan_rx)
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.workspace).unwrap_or(path);
        self.ignore.iter().any(|p| p.matches_path(relative))
    }

    // -- Document lifecycle --

    /// Start tracking a document and scan it right away. Returns false for
    /// ignored paths, which are never tracked.
    pub fn open_document(&mut self, path: PathBuf, language: &str, text: String) -> bool {
        if self.is_ignored(&path) {
            debug!(path = %path.display(), "document ignored");
            return false;
        }
        let mut state = DocumentState::new(language.to_string(), text);
        state.scan();
        debug!(path = %path.display(), sites = state.sites.len(), "document opened");
        self.documents.insert(path, state);
        true
    }

    /// Record new text and schedule a rescan once edits settle.
    pub fn change_document(&mut self, path: &Path, text: String) -> bool {
        let Some(doc) = self.documents.get_mut(path) else {
            return false;
        };
        doc.line_count = count_lines(&text);
        doc.text = text;
        self.debouncer.schedule(path.to_path_buf());
        true
    }

    /// A debounced rescan came due.
    pub fn rescan(&mut self, path: &Path) {
        self.debouncer.fired(&path.to_path_buf());
        if let Some(doc) = self.documents.get_mut(path) {
            doc.scan();
        }
    }

    /// Rescan immediately, superseding any pending debounced rescan.
    pub fn refresh_document(&mut self, path: &Path) -> bool {
        self.debouncer.cancel(&path.to_path_buf());
        match self.documents.get_mut(path) {
            Some(doc) => {
                doc.scan();
                true
            }
            None => false,
        }
    }

    pub fn close_document(&mut self, path: &Path) -> bool {
        self.debouncer.cancel(&path.to_path_buf());
        self.documents.remove(path).is_some()
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn sites(&self, path: &Path) -> Option<&[TestSite]> {
        self.documents.get(path).map(|d| d.sites.as_slice())
    }

    pub fn handle_event(&mut self, event: ServiceEvent) {
        handle_service_event(self, event);
    }

    // -- Per-document reads --

    /// Correlated sites and coverage decorations for an open document.
    /// Rebuilt only when the scan or the store's data for the file changed.
    pub fn view(&mut self, path: &Path) -> Option<&DocumentView> {
        let doc = self.documents.get_mut(path)?;
        let key = ViewKey {
            revision: self.store.revision(path),
            generation: doc.generation,
            line_count: doc.line_count,
        };
        let fresh = matches!(&doc.view, Some((cached, _)) if *cached == key);
        if !fresh {
            let coverage = self.store.coverage_for(path);
            let view = DocumentView {
                sites: correlate(&doc.sites, self.store.tests_for_file(path), coverage),
                decorations: coverage
                    .map(|c| build_decorations(c, doc.line_count))
                    .unwrap_or_default(),
                thresholds: coverage.map(|c| evaluate_thresholds(&c.metrics, &self.thresholds)),
            };
            trace!(path = %path.display(), ?key, "document view rebuilt");
            doc.view = Some((key, view));
        }
        doc.view.as_ref().map(|(_, view)| view)
    }

    pub fn decorations(&mut self, path: &Path) -> Option<&DecorationSet> {
        self.view(path).map(|v| &v.decorations)
    }

    /// Inline label per site as `(0-based line, text)`.
    pub fn site_labels(&mut self, path: &Path) -> Vec<(u32, String)> {
        self.view(path)
            .map(|v| {
                v.sites
                    .iter()
                    .map(|s| (s.site.line, site_label(s)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn hover(&mut self, path: &Path, line: u32) -> Option<String> {
        let view = self.view(path)?;
        hover_for_line(line, &view.decorations, &view.sites)
    }

    pub fn diagnostics(&self, path: &Path) -> Vec<DiagnosticRecord> {
        self.diagnostics.merge(path)
    }

    pub fn diagnostic_files(&self) -> impl Iterator<Item = &Path> {
        self.diagnostics.files()
    }

    /// Threshold check over the current workspace report.
    pub fn coverage_status(&self) -> Option<ThresholdStatus> {
        self.store
            .current_report()
            .map(|r| evaluate_thresholds(&r.metrics, &self.thresholds))
    }

    pub fn coverage_trend(&self) -> Option<CoverageTrend> {
        self.store.coverage_trend()
    }

    /// Flaky candidates from locally retained run history.
    pub fn local_flaky(&self) -> Vec<FlakyTestRecord> {
        self.store.flaky_from_history()
    }

    pub fn notices(&mut self) -> impl Iterator<Item = &Notice> {
        self.notifier.prune_expired(now());
        self.notifier.iter()
    }

    // -- Service calls --

    pub async fn run_tests(&mut self, options: &RunOptions) -> ServiceResult<Vec<TestRecord>> {
        let service = Arc::clone(&self.service);
        let records = service.run_tests(options).await?;
        info!(service = service.name(), tests = records.len(), "test run finished");
        for record in &records {
            self.handle_event(ServiceEvent::TestCompleted(record.clone()));
        }
        Ok(records)
    }

    /// Ask the service for fresh coverage of every known test and install it.
    pub async fn refresh_coverage(&mut self) -> ServiceResult<ThresholdStatus> {
        let service = Arc::clone(&self.service);
        let report = service.analyze_coverage(self.store.tests()).await?;
        let status = evaluate_thresholds(&report.metrics, &self.thresholds);
        if status.is_violated() {
            warn!("{}", status.summary());
        }
        self.notifier.info(
            format!(
                "Coverage refreshed: {:.1}% of lines covered",
                report.metrics.lines.percentage
            ),
            COVERAGE_NOTICE_TTL,
            now(),
        );
        self.handle_event(ServiceEvent::CoverageUpdated(report));
        Ok(status)
    }

    pub async fn refresh_gaps(&mut self) -> ServiceResult<usize> {
        let service = Arc::clone(&self.service);
        let gaps = service.coverage_gaps().await?;
        let count = gaps.len();
        self.handle_event(ServiceEvent::GapsUpdated(gaps));
        Ok(count)
    }

    pub async fn refresh_flaky(
        &mut self,
        options: &FlakyOptions,
    ) -> ServiceResult<Vec<FlakyTestRecord>> {
        let service = Arc::clone(&self.service);
        let records = service.detect_flaky_tests(options).await?;
        self.handle_event(ServiceEvent::FlakyDetected(records.clone()));
        Ok(records)
    }

    pub async fn generate_tests(&self, file: &Path) -> ServiceResult<Vec<GeneratedTest>> {
        let generated = self.service.generate_tests(file).await?;
        info!(file = %file.display(), generated = generated.len(), "tests generated");
        Ok(generated)
    }

    /// Ranked search over all known tests. Refreshes the index when stale;
    /// if that fails, answers from whatever is cached.
    pub async fn search(&mut self, query: &str) -> Vec<TestRecord> {
        let now = now();
        if self.index.is_stale(now) {
            let service = Arc::clone(&self.service);
            match service.list_tests(None).await {
                Ok(tests) => {
                    // Prefer the store's copy, which carries the latest outcome.
                    let tests = tests
                        .into_iter()
                        .map(|t| self.store.get(&t.id).cloned().unwrap_or(t))
                        .collect();
                    self.index.replace_all(tests, now);
                }
                Err(e) => {
                    warn!(error = %e, cached = self.index.len(), "search index refresh failed");
                    self.notifier
                        .warn(format!("Search results may be out of date: {e}"), now);
                }
            }
        }
        self.index
            .search(query, Utc::now())
            .into_iter()
            .cloned()
            .collect()
    }

    // -- Clearing --

    pub fn clear_diagnostics(&mut self, file: &Path) {
        self.diagnostics.clear_file(file);
    }

    /// Forget every result, coverage snapshot and diagnostic.
    pub fn clear_all(&mut self) {
        self.store.clear();
        self.diagnostics.clear_all();
        self.index.invalidate();
        for doc in self.documents.values_mut() {
            doc.view = None;
        }
        info!("all results cleared");
    }
}

const COVERAGE_NOTICE_TTL: std::time::Duration = std::time::Duration::from_secs(10);

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
