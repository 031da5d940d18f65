//! Document validator backed by a TeX toolchain subprocess.
//!
//! The candidate document is written to a scratch directory and handed to
//! the configured compiler under a hard wall-clock timeout. A failed or
//! timed-out run produces a structured error log for the retry loop, never
//! an abort.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::solver::{CompileOutcome, DocumentValidator};

/// How much of a compiler log to carry when no error lines were recognized.
const LOG_TAIL_CHARS: usize = 2000;

/// Validator that runs the document through a TeX compiler.
pub struct TexValidator {
    cmd: String,
    timeout: Duration,
}

impl TexValidator {
    pub fn new(cmd: &str, timeout: Duration) -> Self {
        Self {
            cmd: cmd.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl DocumentValidator for TexValidator {
    async fn validate(&self, document: &str) -> Result<CompileOutcome> {
        let dir = tempfile::tempdir().context("Failed to create scratch directory")?;
        let source = dir.path().join("candidate.tex");
        tokio::fs::write(&source, document)
            .await
            .context("Failed to write candidate document")?;

        let mut child = Command::new(&self.cmd)
            .arg("candidate.tex")
            .current_dir(dir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn compiler '{}'", self.cmd))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for compiler")?,
            Err(_) => {
                // kill_on_drop reaps the hung compiler; the retry loop sees
                // an ordinary validation failure.
                debug!(cmd = %self.cmd, "compiler timed out");
                return Ok(CompileOutcome::failure(format!(
                    "compiler timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if output.status.success() {
            let artifact = tokio::fs::read(dir.path().join("candidate.pdf")).await.ok();
            return Ok(CompileOutcome::success(artifact));
        }

        let log = read_error_log(dir.path(), &output.stderr, &output.stdout).await;
        Ok(CompileOutcome::failure(log))
    }
}

/// Prefer TeX `!`-prefixed error lines from the log file; fall back to the
/// tail of whatever the compiler printed.
async fn read_error_log(dir: &std::path::Path, stderr: &[u8], stdout: &[u8]) -> String {
    if let Ok(log) = tokio::fs::read_to_string(dir.join("candidate.log")).await {
        let errors = extract_tex_errors(&log);
        if !errors.is_empty() {
            return errors;
        }
    }
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = String::from_utf8_lossy(stdout);
    let combined = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    tail(combined.trim(), LOG_TAIL_CHARS)
}

/// Collect `!` error lines plus their following context line.
fn extract_tex_errors(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let mut errors = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.starts_with('!') {
            errors.push(line.to_string());
            if let Some(next) = lines.get(i + 1) {
                if !next.trim().is_empty() {
                    errors.push(next.to_string());
                }
            }
        }
    }
    errors.join("\n")
}

fn tail(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let start = text.len() - max_chars;
    let boundary = (start..text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(start);
    format!("...{}", &text[boundary..])
}
