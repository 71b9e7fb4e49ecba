pub mod stdio;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CoverageGap, CoverageReport, FlakyTestRecord, TestRecord};

pub use stdio::StdioService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("test service unavailable: {0}")]
    Unavailable(String),
    #[error("failed to start test service `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("test service i/o failed")]
    Io(#[from] std::io::Error),
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("malformed {method} response")]
    Malformed {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("empty {method} response")]
    Empty { method: String },
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub watch: bool,
    pub parallel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RunOptions {
    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![file.into()],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlakyOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

/// A test proposed by the service for an uncovered file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTest {
    pub file: PathBuf,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub target_line: Option<u32>,
}

/// The remote test-execution service. Every call may fail when the service
/// process is gone; callers treat that as recoverable.
#[async_trait]
pub trait TestService: Send + Sync {
    async fn run_tests(&self, options: &RunOptions) -> ServiceResult<Vec<TestRecord>>;

    async fn list_tests(&self, framework: Option<&str>) -> ServiceResult<Vec<TestRecord>>;

    async fn analyze_coverage(&self, tests: &[TestRecord]) -> ServiceResult<CoverageReport>;

    async fn coverage_gaps(&self) -> ServiceResult<Vec<CoverageGap>>;

    async fn generate_tests(&self, file: &Path) -> ServiceResult<Vec<GeneratedTest>>;

    async fn detect_flaky_tests(&self, options: &FlakyOptions)
    -> ServiceResult<Vec<FlakyTestRecord>>;

    /// Display name for this service (e.g., "stdio").
    fn name(&self) -> &str;
}
