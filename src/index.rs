//! Ranked free-text search over every known test, for quick navigation.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{TestRecord, TestStatus};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESULTS: usize = 100;

const NAME_WEIGHT: u32 = 100;
const FULL_NAME_WEIGHT: u32 = 50;
const SUITE_WEIGHT: u32 = 30;
const FILE_WEIGHT: u32 = 20;
const TAG_WEIGHT: u32 = 15;
const SUBSEQUENCE_WEIGHT: u32 = 10;
const RECENT_BONUS: u32 = 50;
const SOMEWHAT_RECENT_BONUS: u32 = 20;
const FAILED_BONUS: u32 = 30;

/// A cached copy of all tests with a freshness deadline.
#[derive(Debug)]
pub struct WorkspaceIndex {
    tests: Vec<TestRecord>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
    max_results: usize,
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_RESULTS)
    }
}

impl WorkspaceIndex {
    pub fn new(ttl: Duration, max_results: usize) -> Self {
        Self {
            tests: Vec::new(),
            refreshed_at: None,
            ttl,
            max_results,
        }
    }

    /// True when the cache was never filled or its TTL has elapsed.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.ttl,
        }
    }

    pub fn replace_all(&mut self, tests: Vec<TestRecord>, now: Instant) {
        debug!(tests = tests.len(), "workspace index refreshed");
        self.tests = tests;
        self.refreshed_at = Some(now);
    }

    /// Replace a cached test by id, or append it.
    pub fn upsert(&mut self, record: TestRecord) {
        match self.tests.iter_mut().find(|t| t.id == record.id) {
            Some(slot) => *slot = record,
            None => self.tests.push(record),
        }
    }

    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Matching tests, best first. An empty query lists cached tests in order.
    pub fn search(&self, query: &str, now: DateTime<Utc>) -> Vec<&TestRecord> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return self.tests.iter().take(self.max_results).collect();
        }

        let mut scored: Vec<(u32, &TestRecord)> = self
            .tests
            .iter()
            .filter_map(|test| {
                let score = score(test, &tokens, now);
                (score > 0).then_some((score, test))
            })
            .collect();
        // Stable, so equal scores keep cache order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(self.max_results);
        scored.into_iter().map(|(_, test)| test).collect()
    }
}

fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Total score of `test` against lowercase `tokens`. Recency and failure
/// bonuses only apply once at least one token matched.
pub fn score(test: &TestRecord, tokens: &[String], now: DateTime<Utc>) -> u32 {
    let name = test.name.to_lowercase();
    let full_name = test.full_name.to_lowercase();
    let file = test.file.to_string_lossy().to_lowercase();
    let suite: Vec<String> = test.suite.iter().map(|s| s.to_lowercase()).collect();
    let tags: Vec<String> = test.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut total = 0;
    for token in tokens {
        if name.contains(token.as_str()) {
            total += NAME_WEIGHT;
        }
        if full_name.contains(token.as_str()) {
            total += FULL_NAME_WEIGHT;
        }
        if suite.iter().any(|s| s.contains(token.as_str())) {
            total += SUITE_WEIGHT;
        }
        if file.contains(token.as_str()) {
            total += FILE_WEIGHT;
        }
        if tags.iter().any(|t| t.contains(token.as_str())) {
            total += TAG_WEIGHT;
        }
        if is_subsequence(token, &name) {
            total += SUBSEQUENCE_WEIGHT;
        }
    }
    if total == 0 {
        return 0;
    }

    // Timestamps ahead of `now` come from clock skew and earn no bonus.
    let age = now.signed_duration_since(test.timestamp);
    if age >= chrono::Duration::zero() {
        if age < chrono::Duration::minutes(5) {
            total += RECENT_BONUS;
        } else if age < chrono::Duration::minutes(30) {
            total += SOMEWHAT_RECENT_BONUS;
        }
    }
    if test.status == TestStatus::Failed {
        total += FAILED_BONUS;
    }
    total
}

/// Whether every char of `needle` appears in `haystack` in order.
fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut hay = haystack.chars();
    needle.chars().all(|c| hay.any(|h| h == c))
}
