//! Typed error hierarchy for the Solvent pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `LedgerError` — job registry lookups and state transitions
//! - `SolverError` — per-problem solve/validate retry failures
//! - `PipelineError` — stage-level failures that terminate a job

use thiserror::Error;

/// Errors from the job ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Job {job_id} has no solver record for problem {problem_id}")]
    SolverNotFound { job_id: String, problem_id: String },

    #[error("Invalid solver transition for problem {problem_id}: {from} -> {to}")]
    InvalidTransition {
        problem_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Problem {problem_id} cannot start solving: dependencies not complete")]
    DependenciesNotReady { problem_id: String },

    #[error("Ledger lock poisoned")]
    LockPoisoned,
}

/// Errors from the solve/validate retry engine.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("No solution after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        attempts: u32,
        last_error: String,
        errors: Vec<String>,
    },

    #[error("Solver cancelled")]
    Cancelled,
}

/// Errors from a pipeline stage. Any of these fails the whole job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Final compilation failed: {0}")]
    FinalCompileFailed(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
