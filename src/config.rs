//! Runtime configuration for the solving pipeline.
//!
//! Values layer in the usual order: built-in defaults, then an optional
//! `solvent.toml`, then environment overrides for the external commands,
//! then explicit builder calls from the CLI.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::solver::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, RetryConfig};

/// Default cap on concurrently-running solver tasks within a level.
pub const DEFAULT_MAX_CONCURRENT_SOLVERS: usize = 4;

/// Default wall-clock timeout for one validator subprocess.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on solver tasks in flight within one level. Enforced.
    pub max_concurrent_solvers: usize,
    /// Solve/validate attempts per problem.
    pub max_compile_attempts: u32,
    /// Wall-clock budget for one solve/validate cycle.
    pub solver_timeout: Duration,
    /// Wall-clock budget for one validator subprocess run.
    pub compile_timeout: Duration,
    /// Solve/ingest agent command.
    pub claude_cmd: String,
    /// Document compiler command.
    pub tex_cmd: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_solvers: DEFAULT_MAX_CONCURRENT_SOLVERS,
            max_compile_attempts: DEFAULT_MAX_ATTEMPTS,
            solver_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            claude_cmd: std::env::var("CLAUDE_CMD").unwrap_or_else(|_| "claude".to_string()),
            tex_cmd: std::env::var("TEX_CMD").unwrap_or_else(|_| "tectonic".to_string()),
        }
    }
}

/// On-disk shape of `solvent.toml`. Everything optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    max_concurrent_solvers: Option<usize>,
    max_compile_attempts: Option<u32>,
    solver_timeout_secs: Option<u64>,
    compile_timeout_secs: Option<u64>,
    claude_cmd: Option<String>,
    tex_cmd: Option<String>,
}

impl Config {
    /// Load defaults overlaid with `solvent.toml` if it exists in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Self::default();
        let path = dir.join("solvent.toml");
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            if let Some(v) = file.max_concurrent_solvers {
                config.max_concurrent_solvers = v;
            }
            if let Some(v) = file.max_compile_attempts {
                config.max_compile_attempts = v;
            }
            if let Some(v) = file.solver_timeout_secs {
                config.solver_timeout = Duration::from_secs(v);
            }
            if let Some(v) = file.compile_timeout_secs {
                config.compile_timeout = Duration::from_secs(v);
            }
            if let Some(v) = file.claude_cmd {
                config.claude_cmd = v;
            }
            if let Some(v) = file.tex_cmd {
                config.tex_cmd = v;
            }
        }
        Ok(config)
    }

    /// Set the per-level concurrency cap. Clamped to at least 1.
    pub fn with_max_concurrent_solvers(mut self, max: usize) -> Self {
        self.max_concurrent_solvers = max.max(1);
        self
    }

    /// Set the attempt budget per problem.
    pub fn with_max_compile_attempts(mut self, attempts: u32) -> Self {
        self.max_compile_attempts = attempts;
        self
    }

    /// Set the per-cycle solver timeout.
    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }

    /// Set the validator subprocess timeout.
    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    /// Retry bounds for the per-problem loop.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_compile_attempts,
            attempt_timeout: self.solver_timeout,
        }
    }
}
