use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::TestStatus;

/// Outcome of one test execution as reported by the test service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub status: TestStatus,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
    pub file: PathBuf,
    /// 1-based source line.
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub suite: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub diff: Option<String>,
}

impl TestRecord {
    /// The 0-based line used for editor ranges.
    pub fn zero_based_line(&self) -> u32 {
        self.line.saturating_sub(1)
    }

    /// Remove terminal escape sequences from error text. Service output is
    /// frequently captured from a colored reporter.
    pub fn sanitize(mut self) -> Self {
        if let Some(error) = self.error.take() {
            self.error = Some(TestError {
                message: strip_ansi(&error.message),
                stack: error.stack.map(|s| strip_ansi(&s)),
                expected: error.expected.map(|s| strip_ansi(&s)),
                actual: error.actual.map(|s| strip_ansi(&s)),
                diff: error.diff.map(|s| strip_ansi(&s)),
            });
        }
        self
    }
}

/// Strip ANSI escape sequences from a string.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // Skip until we hit a letter (end of escape sequence)
            for c2 in chars.by_ref() {
                if c2.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mexpected\x1b[0m 1"), "expected 1");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn parses_camel_case_payload() {
        let json = r#"{
            "id": "t1",
            "name": "adds",
            "fullName": "math > adds",
            "status": "failed",
            "duration": 12,
            "file": "/repo/math.test.ts",
            "line": 4,
            "suite": ["math"],
            "tags": ["fast"],
            "timestamp": "2026-01-02T03:04:05Z",
            "error": {"message": "\u001b[31mboom\u001b[0m", "stack": "at adds"}
        }"#;
        let record: TestRecord = serde_json::from_str(json).unwrap();
        let record = record.sanitize();
        assert_eq!(record.full_name, "math > adds");
        assert_eq!(record.status, TestStatus::Failed);
        assert_eq!(record.zero_based_line(), 3);
        assert_eq!(record.error.unwrap().message, "boom");
    }

    #[test]
    fn line_zero_clamps_to_first_line() {
        let json = r#"{"id":"t","name":"n","file":"/f","timestamp":"2026-01-02T03:04:05Z"}"#;
        let record: TestRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.line, 0);
        assert_eq!(record.zero_based_line(), 0);
        assert_eq!(record.status, TestStatus::Queued);
    }
}
