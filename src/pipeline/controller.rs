//! The pipeline controller drives one job through its ordered stages.
//!
//! Stages are strictly sequential: validate → transcribe → chunk →
//! build-graph → solve → synthesize → final-compile. Any stage error fails
//! the job and halts; only the solve stage tolerates per-item failures. The
//! solve stage fans out level by level, each level's items running
//! concurrently under a semaphore, the whole level awaited before the next
//! starts so dependency context is complete.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{LedgerError, PipelineError, SolverError};
use crate::graph::{DependencyGraph, GraphBuilder};
use crate::ledger::{
    ArtifactUpdate, JobLedger, JobStage, JobStatus, JobStatusView, SolverStatus, SolverUpdate,
};
use crate::pipeline::synthesize::synthesize_document;
use crate::problem::flatten;
use crate::solver::{DocumentValidator, IngestAgent, SolveAgent, solve_with_retry};

/// Drives jobs from `queued` to a terminal status.
pub struct PipelineController {
    ledger: Arc<JobLedger>,
    ingest: Arc<dyn IngestAgent>,
    solver: Arc<dyn SolveAgent>,
    validator: Arc<dyn DocumentValidator>,
    config: Config,
}

impl PipelineController {
    pub fn new(
        ledger: Arc<JobLedger>,
        ingest: Arc<dyn IngestAgent>,
        solver: Arc<dyn SolveAgent>,
        validator: Arc<dyn DocumentValidator>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            ingest,
            solver,
            validator,
            config,
        }
    }

    /// The ledger this controller reports into.
    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// Create a job for the given raw input. The job sits in `queued` until
    /// [`PipelineController::run`] picks it up.
    pub fn create_job(&self, input: Option<Vec<u8>>) -> Result<String, LedgerError> {
        self.ledger.create_job(input)
    }

    /// Request cooperative cancellation of a job.
    pub fn cancel_job(&self, job_id: &str) -> Result<(), LedgerError> {
        self.ledger.cancel_job(job_id)
    }

    /// Drive one job to completion, failure, or cancellation.
    ///
    /// Stage errors are absorbed into the job record — the returned `Err`
    /// only ever reports ledger infrastructure problems, never a failed
    /// solve. Poll the returned view (or the event feed) for the outcome.
    pub async fn run(&self, job_id: &str) -> Result<JobStatusView, LedgerError> {
        let outcome = self.drive(job_id).await;
        match outcome {
            Ok(()) => {
                // drive() returns Ok on cancellation too; terminal statuses
                // are sticky so this only lands on still-processing jobs.
                self.ledger
                    .update_status(job_id, JobStatus::Completed, None)?;
            }
            Err(PipelineError::Ledger(err)) => return Err(err),
            Err(err) => {
                warn!(job = %job_id, error = %err, "job failed");
                self.ledger
                    .update_status(job_id, JobStatus::Failed, Some(err.to_string()))?;
            }
        }
        self.ledger.job_status(job_id)
    }

    async fn drive(&self, job_id: &str) -> Result<(), PipelineError> {
        self.ledger
            .update_status(job_id, JobStatus::Processing, None)?;

        // validate: the job was created in this stage, so no stage event.
        let input = self
            .ledger
            .job(job_id)?
            .input
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| PipelineError::InvalidInput("no input document provided".into()))?;
        if self.finished(job_id)? {
            return Ok(());
        }

        // transcribe
        self.ledger.update_stage(job_id, JobStage::Transcribe)?;
        info!(job = %job_id, "transcribing document");
        let transcript = self
            .ingest
            .transcribe(&input)
            .await
            .map_err(|e| stage_error(JobStage::Transcribe, e))?;
        self.ledger.update_artifacts(
            job_id,
            ArtifactUpdate {
                transcript: Some(transcript.clone()),
                ..Default::default()
            },
        )?;
        if self.finished(job_id)? {
            return Ok(());
        }

        // chunk
        self.ledger.update_stage(job_id, JobStage::Chunk)?;
        let problems = self
            .ingest
            .chunk(&transcript)
            .await
            .map_err(|e| stage_error(JobStage::Chunk, e))?;
        if problems.is_empty() {
            return Err(PipelineError::StageFailed {
                stage: JobStage::Chunk.to_string(),
                message: "no problems found in document".into(),
            });
        }
        info!(job = %job_id, problems = problems.len(), "document chunked");
        if self.finished(job_id)? {
            return Ok(());
        }

        // build-graph
        self.ledger.update_stage(job_id, JobStage::BuildGraph)?;
        let problems = self
            .ingest
            .detect_references(problems)
            .await
            .map_err(|e| stage_error(JobStage::BuildGraph, e))?;
        let graph = GraphBuilder::new(flatten(&problems)).build();
        info!(
            job = %job_id,
            nodes = graph.len(),
            levels = graph.levels.len(),
            cyclic = graph.cyclic.len(),
            "dependency graph built"
        );
        self.ledger.update_artifacts(
            job_id,
            ArtifactUpdate {
                problems: Some(problems.clone()),
                graph: Some(graph.clone()),
                ..Default::default()
            },
        )?;
        self.ledger.initialize_solver_jobs(job_id, &graph)?;
        if self.finished(job_id)? {
            return Ok(());
        }

        // solve
        self.ledger.update_stage(job_id, JobStage::Solve)?;
        self.solve_all(job_id, &graph).await?;
        if self.finished(job_id)? {
            return Ok(());
        }

        // synthesize
        self.ledger.update_stage(job_id, JobStage::Synthesize)?;
        let job = self.ledger.job(job_id)?;
        let document = synthesize_document(&problems, &job.solvers);
        self.ledger.update_artifacts(
            job_id,
            ArtifactUpdate {
                document: Some(document.clone()),
                ..Default::default()
            },
        )?;
        if self.finished(job_id)? {
            return Ok(());
        }

        // final-compile: one shot, no retry — retries are item-local.
        self.ledger.update_stage(job_id, JobStage::FinalCompile)?;
        let outcome = self
            .validator
            .validate(&document)
            .await
            .map_err(|e| stage_error(JobStage::FinalCompile, e))?;
        if !outcome.success {
            return Err(PipelineError::FinalCompileFailed(
                outcome
                    .error_log
                    .unwrap_or_else(|| "compiler reported failure".into()),
            ));
        }
        self.ledger.update_artifacts(
            job_id,
            ArtifactUpdate {
                artifact: outcome.artifact,
                ..Default::default()
            },
        )?;

        Ok(())
    }

    /// Fan the solve stage out over the graph's levels.
    ///
    /// Levels run strictly in order; items within a level run concurrently
    /// under the configured semaphore. An item failure is recorded on its
    /// solver record and never aborts siblings or the job. Items whose
    /// dependencies did not complete (a dependency failed, or sits on a
    /// cycle) stay `waiting` and are never dispatched.
    async fn solve_all(&self, job_id: &str, graph: &DependencyGraph) -> Result<(), PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_solvers));
        let retry = self.config.retry_config();

        for (level_index, level) in graph.levels.iter().enumerate() {
            if self.finished(job_id)? {
                return Ok(());
            }
            info!(job = %job_id, level = level_index, items = level.len(), "starting level");

            let mut handles: Vec<JoinHandle<()>> = Vec::new();
            for problem_id in level {
                // Acquiring before dispatch bounds in-flight tasks; the
                // permit rides into the task and frees on completion.
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Other(anyhow::anyhow!(e)))?;

                if self.finished(job_id)? {
                    break;
                }
                if !self.ledger.dependencies_ready(job_id, problem_id)? {
                    // A dependency failed upstream; the item stays waiting
                    // and synthesis will mark it unsolved.
                    warn!(job = %job_id, problem = %problem_id, "dependencies unresolved, skipping");
                    continue;
                }
                let Some(problem) = graph.nodes.get(problem_id).cloned() else {
                    continue;
                };
                let context = self.ledger.dependency_context(job_id, problem_id)?;
                let dispatched = self.ledger.update_solver_status(
                    job_id,
                    problem_id,
                    SolverStatus::Solving,
                    SolverUpdate::with_context(context.clone()),
                )?;
                if !dispatched {
                    continue;
                }

                let ledger = Arc::clone(&self.ledger);
                let solver = Arc::clone(&self.solver);
                let validator = Arc::clone(&self.validator);
                let retry = retry.clone();
                let job_id = job_id.to_string();
                let problem_id = problem_id.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    let result = solve_with_retry(
                        solver.as_ref(),
                        validator.as_ref(),
                        &problem,
                        context.as_deref(),
                        &retry,
                    )
                    .await;

                    let write = match result {
                        Ok(outcome) => ledger.update_solver_status(
                            &job_id,
                            &problem_id,
                            SolverStatus::Completed,
                            SolverUpdate::solved(outcome.solution, outcome.attempts, outcome.errors),
                        ),
                        Err(SolverError::AttemptsExhausted {
                            attempts,
                            last_error,
                            errors,
                        }) => ledger.update_solver_status(
                            &job_id,
                            &problem_id,
                            SolverStatus::Failed,
                            SolverUpdate::failed(last_error, attempts, errors),
                        ),
                        Err(SolverError::Cancelled) => ledger.update_solver_status(
                            &job_id,
                            &problem_id,
                            SolverStatus::Failed,
                            SolverUpdate::failed("cancelled".into(), 0, Vec::new()),
                        ),
                    };
                    // Ok(false) means the record went terminal while we ran
                    // (cancellation) and the result was dropped on purpose.
                    if let Err(err) = write {
                        warn!(job = %job_id, problem = %problem_id, error = %err, "failed to record solver result");
                    }
                }));
            }

            // The whole level must land before the next starts: later
            // levels' dependency context needs these solutions.
            for joined in futures::future::join_all(handles).await {
                if joined.is_err() {
                    warn!(job = %job_id, "solver task panicked");
                }
            }
        }

        Ok(())
    }

    /// True once the job has reached a terminal status (cancelled mid-run).
    fn finished(&self, job_id: &str) -> Result<bool, LedgerError> {
        Ok(self.ledger.job_status(job_id)?.status.is_terminal())
    }
}

fn stage_error(stage: JobStage, err: anyhow::Error) -> PipelineError {
    PipelineError::StageFailed {
        stage: stage.to_string(),
        message: format!("{:#}", err),
    }
}
