use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::models::{CoverageGap, CoverageReport, FlakyTestRecord, TestRecord};

use super::{
    FlakyOptions, GeneratedTest, RunOptions, ServiceError, ServiceResult, TestService,
};

/// Guard that kills the child process (and its entire process group) on drop.
struct ChildGuard {
    child: Option<tokio::process::Child>,
    /// Process group ID saved at spawn time so we can kill the whole group.
    #[cfg(unix)]
    pgid: Option<u32>,
}

impl ChildGuard {
    fn new(child: tokio::process::Child) -> Self {
        #[cfg(unix)]
        let pgid = child.id();
        Self {
            child: Some(child),
            #[cfg(unix)]
            pgid,
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        // Kill the entire process group so workers spawned by the service go with it.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
        }
        // Fallback / non-Unix: kill just the direct child.
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

/// A live service process. Dropping it kills the process group.
struct Connection {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    _guard: ChildGuard,
}

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    message: String,
}

/// Talks to a test service process over newline-delimited JSON on its
/// stdin/stdout. The process is started on first use and restarted on the
/// next call after it exits. Calls are serialized: one request is answered
/// before the next is written.
pub struct StdioService {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl StdioService {
    /// `command` is split with shell quoting rules, e.g. `"npx test-service --stdio"`.
    pub fn new(command: &str, cwd: PathBuf, timeout: Duration) -> ServiceResult<Self> {
        let mut words = shell_words::split(command)
            .map_err(|e| ServiceError::Unavailable(format!("invalid service command: {e}")))?;
        if words.is_empty() {
            return Err(ServiceError::Unavailable("no service command configured".into()));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
            cwd,
            timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        })
    }

    fn spawn(&self) -> ServiceResult<Connection> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        debug!(cmd = ?cmd.as_std(), cwd = ?self.cwd, "starting test service");

        // Own process group, so the guard can take down anything the service forks.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.as_std_mut().process_group(0);
        }

        let mut child = cmd
            .current_dir(&self.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "lens_overlay::service::stderr", "{line}");
            }
        });

        Ok(Connection {
            stdin,
            stdout: BufReader::new(stdout).lines(),
            _guard: ChildGuard::new(child),
        })
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> ServiceResult<R> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        let Some(connection) = slot.as_mut() else {
            return Err(ServiceError::Unavailable("service not running".into()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = exchange(connection, id, method, params);
        let outcome = match tokio::time::timeout(self.timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ServiceError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                // The stream may be mid-response; start clean next time.
                if matches!(
                    err,
                    ServiceError::Timeout { .. } | ServiceError::Io(_) | ServiceError::Unavailable(_)
                ) {
                    warn!(method, error = %err, "dropping test service connection");
                    *slot = None;
                }
                return Err(err);
            }
        };

        serde_json::from_value(value).map_err(|source| ServiceError::Malformed {
            method: method.to_string(),
            source,
        })
    }
}

async fn exchange(
    connection: &mut Connection,
    id: u64,
    method: &str,
    params: Value,
) -> ServiceResult<Value> {
    let request = Request { id, method, params };
    let mut line = serde_json::to_string(&request).map_err(|source| ServiceError::Malformed {
        method: method.to_string(),
        source,
    })?;
    trace!(method, "[stdin] {line}");
    line.push('\n');
    connection.stdin.write_all(line.as_bytes()).await?;
    connection.stdin.flush().await?;

    loop {
        let Some(line) = connection.stdout.next_line().await? else {
            return Err(ServiceError::Unavailable(format!(
                "service exited before answering {method}"
            )));
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(method, "[stdout] {line}");

        // Banners and log noise are not protocol messages.
        let Ok(response) = serde_json::from_str::<Response>(line) else {
            continue;
        };
        if response.id != id {
            debug!(expected = id, got = response.id, "ignoring stale response");
            continue;
        }
        if let Some(error) = response.error {
            return Err(ServiceError::Remote {
                method: method.to_string(),
                message: error.message,
            });
        }
        return match response.result {
            Some(Value::Null) | None => Err(ServiceError::Empty {
                method: method.to_string(),
            }),
            Some(value) => Ok(value),
        };
    }
}

fn missing_pipe(name: &str) -> ServiceError {
    ServiceError::Unavailable(format!("service {name} was not captured"))
}

/// Decode flaky entries one by one so a single bad count does not cost the
/// rest of the batch.
fn valid_flaky(entries: Vec<Value>) -> Vec<FlakyTestRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<FlakyTestRecord>(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "dropping invalid flaky test entry");
                None
            }
        })
        .collect()
}

fn sanitize_all(records: Vec<TestRecord>) -> Vec<TestRecord> {
    records.into_iter().map(TestRecord::sanitize).collect()
}

#[async_trait]
impl TestService for StdioService {
    async fn run_tests(&self, options: &RunOptions) -> ServiceResult<Vec<TestRecord>> {
        let records = self.call("runTests", json!(options)).await?;
        Ok(sanitize_all(records))
    }

    async fn list_tests(&self, framework: Option<&str>) -> ServiceResult<Vec<TestRecord>> {
        let records = self
            .call("listTests", json!({ "framework": framework }))
            .await?;
        Ok(sanitize_all(records))
    }

    async fn analyze_coverage(&self, tests: &[TestRecord]) -> ServiceResult<CoverageReport> {
        self.call("analyzeCoverage", json!({ "tests": tests })).await
    }

    async fn coverage_gaps(&self) -> ServiceResult<Vec<CoverageGap>> {
        self.call("getCoverageGaps", json!({})).await
    }

    async fn generate_tests(&self, file: &Path) -> ServiceResult<Vec<GeneratedTest>> {
        self.call("generateTests", json!({ "filePath": file })).await
    }

    async fn detect_flaky_tests(
        &self,
        options: &FlakyOptions,
    ) -> ServiceResult<Vec<FlakyTestRecord>> {
        let entries: Vec<Value> = self.call("detectFlakyTests", json!(options)).await?;
        Ok(valid_flaky(entries))
    }

    fn name(&self) -> &str {
        "stdio"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn service(script: &str, timeout_ms: u64) -> StdioService {
        let command = format!("sh -c {}", shell_words::quote(script));
        StdioService::new(
            &command,
            std::env::temp_dir(),
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            StdioService::new("  ", PathBuf::from("."), Duration::from_secs(1)),
            Err(ServiceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn skips_noise_and_parses_result() {
        let svc = service(
            r#"read line; echo "service ready"; echo '{"id":1,"result":[]}'"#,
            5_000,
        );
        let tests = svc.list_tests(None).await.unwrap();
        assert_eq!(tests, Vec::new());
    }

    #[tokio::test]
    async fn remote_errors_are_reported() {
        let svc = service(
            r#"read line; echo '{"id":1,"error":{"message":"no framework detected"}}'"#,
            5_000,
        );
        let err = svc.coverage_gaps().await.unwrap_err();
        assert_eq!(err.to_string(), "getCoverageGaps failed: no framework detected");
    }

    #[tokio::test]
    async fn null_result_is_empty() {
        let svc = service(r#"read line; echo '{"id":1,"result":null}'"#, 5_000);
        assert!(matches!(
            svc.coverage_gaps().await,
            Err(ServiceError::Empty { .. })
        ));
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        let svc = service(r#"read line; echo '{"id":1,"result":{"oops":true}}'"#, 5_000);
        assert!(matches!(
            svc.list_tests(None).await,
            Err(ServiceError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn early_exit_is_unavailable() {
        let svc = service("exit 0", 5_000);
        assert!(matches!(
            svc.list_tests(None).await,
            Err(ServiceError::Unavailable(_) | ServiceError::Io(_))
        ));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let svc = service("read line; sleep 5", 100);
        assert!(matches!(
            svc.list_tests(None).await,
            Err(ServiceError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_flaky_entries_are_dropped() {
        let svc = service(
            r#"read line; echo '{"id":1,"result":[{"testId":"t1","testName":"adds","file":"/a.ts","line":3,"failures":3,"totalRuns":10},{"testId":"t2","testName":"subs","file":"/a.ts","line":9,"failures":0,"totalRuns":10}]}'"#,
            5_000,
        );
        let flaky = svc.detect_flaky_tests(&FlakyOptions::default()).await.unwrap();
        assert_eq!(flaky.len(), 1);
        assert_eq!(flaky[0].test_id, "t1");
        assert_eq!(flaky[0].failure_rate(), 0.3);
    }

    #[tokio::test]
    async fn respawns_after_the_process_exits() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started-once");
        let script = format!(
            r#"if [ -f {marker} ]; then read line; echo '{{"id":2,"result":[]}}'; else touch {marker}; read line; exit 0; fi"#,
            marker = shell_words::quote(&marker.to_string_lossy()),
        );
        let svc = service(&script, 5_000);

        assert!(svc.list_tests(None).await.is_err());
        let tests = svc.list_tests(None).await.unwrap();
        assert_eq!(tests.len(), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_service_kills_forked_workers() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let script = format!(
            r#"sleep 30 & echo $! > {pid_file}; read line; echo '{{"id":1,"result":[]}}'; wait"#,
            pid_file = shell_words::quote(&pid_file.to_string_lossy()),
        );
        let svc = service(&script, 5_000);
        svc.list_tests(None).await.unwrap();

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(is_running(&pid), "worker should be alive while the service is");

        drop(svc);
        let mut alive = true;
        for _ in 0..50 {
            if !is_running(&pid) {
                alive = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "worker {pid} outlived the service");
    }

    /// Live and not a zombie awaiting its reaper.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.trim_start().chars().next()
            })
            .is_some_and(|state| state != 'Z' && state != 'X')
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let svc = StdioService::new(
            "definitely-not-a-test-service-binary",
            std::env::temp_dir(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            svc.list_tests(None).await,
            Err(ServiceError::Spawn { .. })
        ));
    }
}
