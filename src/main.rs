use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lens_overlay::service::{FlakyOptions, RunOptions};
use lens_overlay::{Config, Engine, StdioService, TestService};

const USAGE: &str = "\
usage: lens-overlay <command>

commands:
  annotate <file> [language]   run a file's tests and print its overlay
  diagnostics <file>           run a file's tests and print merged diagnostics
  search <query...>            rank known tests against a query
  flaky                        ask the service for flaky tests";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::load(&workspace);
    let service: Arc<dyn TestService> = Arc::new(
        StdioService::new(
            &config.service.command,
            workspace.clone(),
            config.service.timeout(),
        )
        .context("failed to configure test service")?,
    );
    let (mut engine, _rescans) = Engine::new(workspace.clone(), &config, service);

    let output = match (command.as_str(), rest) {
        ("annotate", [file, language @ ..]) => {
            let path = absolute(&workspace, file);
            let language = match language.first() {
                Some(language) => language.clone(),
                None => extension_of(&path)?,
            };
            annotate(&mut engine, path, &language).await?
        }
        ("diagnostics", [file]) => {
            let path = absolute(&workspace, file);
            engine
                .run_tests(&RunOptions::for_file(&path))
                .await
                .context("test run failed")?;
            if let Err(e) = engine.refresh_gaps().await {
                warn!(error = %e, "coverage gaps unavailable");
            }
            json!({
                "file": path,
                "diagnostics": engine.diagnostics(&path),
            })
        }
        ("search", query) if !query.is_empty() => {
            let results = engine.search(&query.join(" ")).await;
            let notices: Vec<_> = engine.notices().cloned().collect();
            json!({ "results": results, "notices": notices })
        }
        ("flaky", []) => {
            let flaky = engine
                .refresh_flaky(&FlakyOptions::default())
                .await
                .context("flaky detection failed")?;
            let rows: Vec<_> = flaky
                .iter()
                .map(|f| json!({ "record": f, "failureRate": f.failure_rate() }))
                .collect();
            json!(rows)
        }
        _ => bail!("{USAGE}"),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn annotate(engine: &mut Engine, path: PathBuf, language: &str) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if !engine.open_document(path.clone(), language, text) {
        bail!("{} is ignored by lens.toml", path.display());
    }

    engine
        .run_tests(&RunOptions::for_file(&path))
        .await
        .context("test run failed")?;
    // The overlay is still useful without coverage.
    let coverage = match engine.refresh_coverage().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(error = %e, "coverage unavailable");
            None
        }
    };

    let labels = engine.site_labels(&path);
    let view = engine.view(&path).cloned();
    Ok(json!({
        "file": path,
        "labels": labels,
        "view": view,
        "coverage": coverage,
        "trend": engine.coverage_trend().map(|t| json!({
            "lines": t.lines,
            "branches": t.branches,
            "functions": t.functions,
            "statements": t.statements,
        })),
    }))
}

fn absolute(workspace: &Path, file: &str) -> PathBuf {
    let path = PathBuf::from(file);
    if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    }
}

fn extension_of(path: &Path) -> Result<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot infer language of {}; pass it explicitly", path.display()))
}

/// Logs go to stderr, or to the file named by `LENS_DEBUG`.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env("LENS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("LENS_DEBUG") {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {path}"))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        Err(_) => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
