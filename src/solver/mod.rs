//! Per-problem solving: collaborator traits and the bounded retry loop.

mod agent;
mod retry;

pub use agent::{CompileOutcome, DocumentValidator, IngestAgent, SolveAgent};
pub use retry::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, RetryConfig, RetryOutcome, solve_with_retry,
};
