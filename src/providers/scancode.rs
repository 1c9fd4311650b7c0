//! ScanCode process provider.
//!
//! Claims process:scancode requests. Runs the external scancode binary over
//! a harvested directory and publishes the JSON results as the stage
//! document. The tool's exit code cannot be trusted on its own: a non-zero
//! exit can mean a benign partial scan, and a clean exit can hide per-file
//! scan errors, so classification reads the results file as well.

use crate::config::ScanCodeOptions;
use crate::dispatch::Handler;
use crate::error::{Error, Result};
use crate::model::{Document, Request};
use crate::providers;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Tool version detected once per process; every instance shares it.
static TOOL_VERSION: OnceCell<String> = OnceCell::const_new();

pub struct ScanCode {
    options: ScanCodeOptions,
}

impl ScanCode {
    pub fn new(options: ScanCodeOptions) -> Self {
        Self { options }
    }

    /// Detect the tool version. Runs the binary at most once per process.
    async fn tool_version(&self) -> Result<&'static str> {
        TOOL_VERSION
            .get_or_try_init(|| async {
                let output = Command::new(&self.options.command)
                    .arg("--version")
                    .output()
                    .await
                    .map_err(|e| {
                        Error::TransientProvider(format!("scancode not runnable: {e}"))
                    })?;
                if !output.status.success() {
                    return Err(Error::TransientProvider(format!(
                        "scancode --version exited with {}",
                        output.status
                    )));
                }
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout.replace("ScanCode version ", "").trim().to_string())
            })
            .await
            .map(|v| v.as_str())
    }

    /// Harvest size in KB plus file count, skipping VCS internals.
    async fn compute_size(location: PathBuf) -> Result<(u64, u64)> {
        tokio::task::spawn_blocking(move || -> std::io::Result<(u64, u64)> {
            fn walk(dir: &Path, bytes: &mut u64, count: &mut u64) -> std::io::Result<()> {
                for entry in std::fs::read_dir(dir)? {
                    let entry = entry?;
                    if entry.file_name() == ".git" {
                        continue;
                    }
                    let meta = entry.metadata()?;
                    if meta.is_dir() {
                        walk(&entry.path(), bytes, count)?;
                    } else {
                        *bytes += meta.len();
                        *count += 1;
                    }
                }
                Ok(())
            }
            let mut bytes = 0;
            let mut count = 0;
            walk(&location, &mut bytes, &mut count)?;
            Ok(((bytes + 512) / 1024, count))
        })
        .await
        .map_err(|e| Error::Other(format!("size task: {e}")))?
        .map_err(Error::from)
    }
}

#[async_trait]
impl Handler for ScanCode {
    fn name(&self) -> &str {
        "scancode"
    }

    fn can_handle(&self, request: &Request) -> bool {
        request.request_type == "process:scancode"
    }

    async fn handle(&self, mut request: Request) -> Result<Request> {
        let prior = request.document.take().ok_or_else(|| {
            Error::PermanentProvider("nothing harvested to scan".to_string())
        })?;
        let location = prior.location.clone().ok_or_else(|| {
            Error::PermanentProvider("harvest has no location".to_string())
        })?;

        let version = self.tool_version().await?;
        request.add_meta("toolVersion", serde_json::json!(version));

        let (k, count) = Self::compute_size(PathBuf::from(&location)).await?;
        request.add_meta("k", serde_json::json!(k));
        request.add_meta("fileCount", serde_json::json!(count));
        metrics::harvest_files().add(count, &[KeyValue::new("provider", "scancode")]);

        if count > self.options.max_count || k > self.options.max_size_kb {
            request.document = Some(prior);
            request.mark_dead(format!(
                "harvest too large to scan locally: {count} files, {k} KB"
            ));
            return Ok(request);
        }

        let output = providers::harvest_file("crawlq-scancode-", ".json")?;
        info!(
            request_id = %request.id,
            input = %location,
            output = %output.display(),
            "analyzing harvest with scancode"
        );

        let mut command = Command::new(&self.options.command);
        command
            .args(&self.options.options)
            .arg("--timeout")
            .arg(self.options.timeout_secs.to_string())
            .arg("-n")
            .arg(self.options.processes.to_string())
            .arg(&self.options.format)
            .arg(&output)
            .arg(&location)
            .kill_on_drop(true);

        let deadline = Duration::from_secs(self.options.timeout_secs);
        let run = match tokio::time::timeout(deadline, command.output()).await {
            Err(_) => {
                return Err(Error::TransientProvider(format!(
                    "scancode timed out after {}s",
                    self.options.timeout_secs
                )));
            }
            Ok(Err(e)) => {
                return Err(Error::TransientProvider(format!(
                    "scancode failed to run: {e}"
                )));
            }
            Ok(Ok(run)) => run,
        };

        if !run.status.success() {
            let stderr = String::from_utf8_lossy(&run.stderr);
            if !is_benign_run_failure(&stderr) {
                let line = stderr.lines().next().unwrap_or("no stderr").to_string();
                request.document = Some(prior);
                request.mark_dead(format!("scancode exited with {}: {line}", run.status));
                return Ok(request);
            }
            debug!(request_id = %request.id, "partial-scan exit, checking results");
        }

        let raw = tokio::fs::read_to_string(&output).await.map_err(|e| {
            Error::TransientProvider(format!("scancode produced no readable output: {e}"))
        })?;
        let results: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
            Error::TransientProvider(format!("scancode output is not valid JSON: {e}"))
        })?;
        if has_real_errors(&results) {
            request.document = Some(prior);
            request.mark_dead("scancode reported unrecoverable scan errors".to_string());
            return Ok(request);
        }

        let mut document = Document::at_location(output.to_string_lossy())
            .content_type("application/json");
        if let Some(date) = prior.release_date {
            document = document.release_date(date);
        }
        request.document = Some(document);
        Ok(request)
    }
}

/// Whole-run failure that is actually a benign partial scan. Substring
/// match against observed tool output; not exhaustive, so misclassification
/// in both directions is possible.
fn is_benign_run_failure(stderr: &str) -> bool {
    stderr.contains("Some files failed to scan properly")
}

/// Does the results file carry per-file errors beyond the known-benign
/// ones (per-file timeouts and two classes of parser noise)?
fn has_real_errors(results: &serde_json::Value) -> bool {
    let Some(files) = results.get("files").and_then(|f| f.as_array()) else {
        return false;
    };
    files.iter().any(|file| {
        file.get("scan_errors")
            .and_then(|e| e.as_array())
            .map(|errors| {
                errors.iter().any(|error| {
                    error.as_str().is_some_and(|text| {
                        !(text.contains("ERROR: Processing interrupted: timeout after")
                            || text.contains("ValueError:")
                            || text.contains("package.json"))
                    })
                })
            })
            .unwrap_or(false)
    })
}
