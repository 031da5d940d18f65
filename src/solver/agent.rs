//! External collaborator interfaces.
//!
//! The pipeline never talks to a model or a compiler directly; it consumes
//! these traits. Reference implementations live in `crate::agents`, test
//! doubles next to the tests that use them.

use async_trait::async_trait;

use crate::problem::Problem;

/// Produces a candidate solution for one problem.
#[async_trait]
pub trait SolveAgent: Send + Sync {
    /// Generate a candidate solution.
    ///
    /// `dependency_context` carries the solutions of completed dependencies;
    /// `prior_errors` carries the validator's error log from every failed
    /// attempt so far, oldest first.
    async fn solve(
        &self,
        problem: &Problem,
        dependency_context: Option<&str>,
        prior_errors: &[String],
    ) -> anyhow::Result<String>;
}

/// Validates a candidate document by compiling it.
#[async_trait]
pub trait DocumentValidator: Send + Sync {
    async fn validate(&self, document: &str) -> anyhow::Result<CompileOutcome>;
}

/// Turns raw input into an annotated problem list, upstream of the graph
/// builder.
#[async_trait]
pub trait IngestAgent: Send + Sync {
    /// Raw uploaded bytes -> source text.
    async fn transcribe(&self, input: &[u8]) -> anyhow::Result<String>;

    /// Source text -> problem tree in document order.
    async fn chunk(&self, transcript: &str) -> anyhow::Result<Vec<Problem>>;

    /// Annotate explicit cross-references between problems. Receives and
    /// returns the full tree.
    async fn detect_references(&self, problems: Vec<Problem>) -> anyhow::Result<Vec<Problem>>;
}

/// Result of one compile/validate call.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    /// Compiled output on success (e.g. a PDF).
    pub artifact: Option<Vec<u8>>,
    /// Structured error log on failure, fed back into the next solve attempt.
    pub error_log: Option<String>,
}

impl CompileOutcome {
    pub fn success(artifact: Option<Vec<u8>>) -> Self {
        Self {
            success: true,
            artifact,
            error_log: None,
        }
    }

    pub fn failure(error_log: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact: None,
            error_log: Some(error_log.into()),
        }
    }
}
