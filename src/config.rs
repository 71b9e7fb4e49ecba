use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::overlay::CoverageThresholds;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub coverage: CoverageThresholds,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// How to reach the external test service.
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    /// Command line that starts the service in stdio mode.
    /// Example: "npx test-service --stdio"
    #[serde(default = "default_service_command")]
    pub command: String,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_service_command() -> String {
    "npx test-service --stdio".to_string()
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: default_service_command(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Controls when and where documents are scanned for test sites.
#[derive(Debug, Deserialize)]
pub struct ScannerConfig {
    /// Quiet period after the last edit before a document is rescanned.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Glob patterns (relative to workspace root) of documents to skip.
    /// Example: ["vendor/**", "**/*.generated.ts"]
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: Vec::new(),
        }
    }
}

impl ScannerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_ttl_secs() -> u64 {
    30
}

fn default_max_results() -> usize {
    100
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_results: default_max_results(),
        }
    }
}

impl IndexConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Runs retained per test.
    #[serde(default = "default_history")]
    pub history_limit: usize,
    /// Coverage reports retained for trend comparison.
    #[serde(default = "default_history")]
    pub report_history: usize,
}

fn default_history() -> usize {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history(),
            report_history: default_history(),
        }
    }
}

impl Config {
    /// Load `lens.toml` from the workspace root, falling back to defaults if absent or invalid.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join("lens.toml");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        toml::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring invalid config");
            Self::default()
        })
    }
}
