use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlakyError {
    #[error("test {test_id} has no recorded runs")]
    NoRuns { test_id: String },
    #[error("test {test_id} never failed in {total_runs} runs")]
    NeverFailed { test_id: String, total_runs: u32 },
    #[error("test {test_id} failed all {total_runs} runs")]
    AlwaysFailed { test_id: String, total_runs: u32 },
    #[error("test {test_id} reports {failures} failures out of {total_runs} runs")]
    TooManyFailures {
        test_id: String,
        failures: u32,
        total_runs: u32,
    },
}

/// A test whose run history holds both failures and successes.
///
/// Only the counts are stored; the failure rate is always derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawFlaky")]
pub struct FlakyTestRecord {
    pub test_id: String,
    pub test_name: String,
    pub file: PathBuf,
    /// 1-based source line.
    pub line: u32,
    failures: u32,
    total_runs: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFlaky {
    test_id: String,
    test_name: String,
    file: PathBuf,
    #[serde(default)]
    line: u32,
    failures: u32,
    total_runs: u32,
}

impl TryFrom<RawFlaky> for FlakyTestRecord {
    type Error = FlakyError;

    fn try_from(raw: RawFlaky) -> Result<Self, Self::Error> {
        FlakyTestRecord::new(
            raw.test_id,
            raw.test_name,
            raw.file,
            raw.line,
            raw.failures,
            raw.total_runs,
        )
    }
}

impl FlakyTestRecord {
    pub fn new(
        test_id: impl Into<String>,
        test_name: impl Into<String>,
        file: impl Into<PathBuf>,
        line: u32,
        failures: u32,
        total_runs: u32,
    ) -> Result<Self, FlakyError> {
        let test_id = test_id.into();
        if total_runs == 0 {
            return Err(FlakyError::NoRuns { test_id });
        }
        if failures == 0 {
            return Err(FlakyError::NeverFailed {
                test_id,
                total_runs,
            });
        }
        if failures == total_runs {
            return Err(FlakyError::AlwaysFailed {
                test_id,
                total_runs,
            });
        }
        if failures > total_runs {
            return Err(FlakyError::TooManyFailures {
                test_id,
                failures,
                total_runs,
            });
        }
        Ok(Self {
            test_id,
            test_name: test_name.into(),
            file: file.into(),
            line,
            failures,
            total_runs,
        })
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn total_runs(&self) -> u32 {
        self.total_runs
    }

    pub fn failure_rate(&self) -> f64 {
        f64::from(self.failures) / f64::from(self.total_runs)
    }
}
