//! The solve/validate retry loop for one problem.
//!
//! Each attempt calls the solve agent, then the validator. A failed
//! validation is not discarded: its error log joins the `prior_errors` fed
//! into the next solve call, turning the compiler into a feedback signal for
//! the generative step and bounding an otherwise-unbounded loop.

use std::time::Duration;

use tracing::debug;

use crate::errors::SolverError;
use crate::problem::Problem;
use crate::solver::agent::{DocumentValidator, SolveAgent};

/// Default attempt budget per problem.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wall-clock budget for one solve/validate cycle.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounds for the retry loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum solve/validate round trips, counting from 1.
    pub max_attempts: u32,
    /// Wall-clock budget for one full cycle; expiry is a retryable failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

/// A validated solution plus the trail it took to get there.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub solution: String,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
    /// Error log from every failed attempt, oldest first.
    pub errors: Vec<String>,
}

/// Drive one problem through the bounded solve/validate loop.
///
/// Success on the final allowed attempt is still success. Agent-call
/// failures (network, subprocess, timeout) are retried exactly like
/// validation failures. After exhaustion the terminal error carries the most
/// recent failure text and the full trail.
pub async fn solve_with_retry(
    agent: &dyn SolveAgent,
    validator: &dyn DocumentValidator,
    problem: &Problem,
    dependency_context: Option<&str>,
    config: &RetryConfig,
) -> Result<RetryOutcome, SolverError> {
    let mut errors: Vec<String> = Vec::new();

    for attempt in 1..=config.max_attempts.max(1) {
        debug!(
            problem = %problem.id,
            attempt,
            max_attempts = config.max_attempts,
            prior_errors = errors.len(),
            "starting solve attempt"
        );

        let cycle = async {
            let candidate = agent
                .solve(problem, dependency_context, &errors)
                .await
                .map_err(|e| format!("solve agent failed: {:#}", e))?;
            let outcome = validator
                .validate(&candidate)
                .await
                .map_err(|e| format!("validator failed: {:#}", e))?;
            Ok::<_, String>((candidate, outcome))
        };

        match tokio::time::timeout(config.attempt_timeout, cycle).await {
            Ok(Ok((candidate, outcome))) => {
                if outcome.success {
                    return Ok(RetryOutcome {
                        solution: candidate,
                        attempts: attempt,
                        errors,
                    });
                }
                let log = outcome
                    .error_log
                    .unwrap_or_else(|| "validation failed without error log".to_string());
                debug!(problem = %problem.id, attempt, "validation failed");
                errors.push(log);
            }
            Ok(Err(call_error)) => {
                debug!(problem = %problem.id, attempt, error = %call_error, "external call failed");
                errors.push(call_error);
            }
            Err(_) => {
                let msg = format!(
                    "attempt {} timed out after {}s",
                    attempt,
                    config.attempt_timeout.as_secs()
                );
                debug!(problem = %problem.id, attempt, "attempt timed out");
                errors.push(msg);
            }
        }
    }

    let last_error = errors
        .last()
        .cloned()
        .unwrap_or_else(|| "no attempts were made".to_string());
    Err(SolverError::AttemptsExhausted {
        attempts: config.max_attempts.max(1),
        last_error,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::agent::CompileOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Agent that records how many prior errors each call saw.
    struct RecordingAgent {
        seen_errors: Mutex<Vec<usize>>,
    }

    impl RecordingAgent {
        fn new() -> Self {
            Self {
                seen_errors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SolveAgent for RecordingAgent {
        async fn solve(
            &self,
            problem: &Problem,
            _context: Option<&str>,
            prior_errors: &[String],
        ) -> anyhow::Result<String> {
            self.seen_errors.lock().unwrap().push(prior_errors.len());
            Ok(format!("solution for {}", problem.id))
        }
    }

    /// Validator that fails the first `failures` calls, then succeeds.
    struct FlakyValidator {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyValidator {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentValidator for FlakyValidator {
        async fn validate(&self, _document: &str) -> anyhow::Result<CompileOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Ok(CompileOutcome::failure(format!("error on call {}", call)))
            } else {
                Ok(CompileOutcome::success(None))
            }
        }
    }

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn problem() -> Problem {
        Problem::new("1", "1", "compute the thing")
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let agent = RecordingAgent::new();
        let validator = FlakyValidator::new(0);
        let outcome = solve_with_retry(&agent, &validator, &problem(), None, &config(5))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.solution, "solution for 1");
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds_within_three_attempts() {
        let agent = RecordingAgent::new();
        let validator = FlakyValidator::new(2);
        let outcome = solve_with_retry(&agent, &validator, &problem(), None, &config(3))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.errors.len(), 2);
        // Attempt 3's solve call saw both accumulated errors.
        assert_eq!(*agent.seen_errors.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error_and_bounds_round_trips() {
        let agent = RecordingAgent::new();
        let validator = FlakyValidator::new(u32::MAX);
        let err = solve_with_retry(&agent, &validator, &problem(), None, &config(4))
            .await
            .unwrap_err();

        match err {
            SolverError::AttemptsExhausted {
                attempts,
                last_error,
                errors,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "error on call 4");
                assert_eq!(errors.len(), 4);
            }
            other => panic!("expected AttemptsExhausted, got {other:?}"),
        }
        assert_eq!(validator.call_count(), 4);
    }

    #[tokio::test]
    async fn test_agent_failure_retried_like_validation_failure() {
        struct FailingOnceAgent {
            calls: AtomicU32,
        }

        #[async_trait]
        impl SolveAgent for FailingOnceAgent {
            async fn solve(
                &self,
                _problem: &Problem,
                _context: Option<&str>,
                prior_errors: &[String],
            ) -> anyhow::Result<String> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("connection reset");
                }
                assert_eq!(prior_errors.len(), 1);
                assert!(prior_errors[0].contains("connection reset"));
                Ok("recovered".to_string())
            }
        }

        let agent = FailingOnceAgent {
            calls: AtomicU32::new(0),
        };
        let validator = FlakyValidator::new(0);
        let outcome = solve_with_retry(&agent, &validator, &problem(), None, &config(3))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.solution, "recovered");
    }

    #[tokio::test]
    async fn test_timeout_is_a_retryable_failure() {
        struct SlowAgent;

        #[async_trait]
        impl SolveAgent for SlowAgent {
            async fn solve(
                &self,
                _problem: &Problem,
                _context: Option<&str>,
                _prior_errors: &[String],
            ) -> anyhow::Result<String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".to_string())
            }
        }

        let validator = FlakyValidator::new(0);
        let cfg = RetryConfig {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(10),
        };
        let err = solve_with_retry(&SlowAgent, &validator, &problem(), None, &cfg)
            .await
            .unwrap_err();
        match err {
            SolverError::AttemptsExhausted { last_error, .. } => {
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected AttemptsExhausted, got {other:?}"),
        }
        // The validator was never reached.
        assert_eq!(validator.call_count(), 0);
    }
}
