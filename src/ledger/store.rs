//! The job ledger: single source of truth for Job and SolverJob state.
//!
//! All mutation goes through ledger methods; each method locks the registry
//! only for its own mutation, so concurrently-running solver tasks can update
//! the same job without a read-modify-write race. Callers get owned
//! snapshots, never references into the map.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;

use crate::errors::LedgerError;
use crate::graph::DependencyGraph;
use crate::ledger::events::{JobEvent, JobEventKind, publish};
use crate::ledger::job::{
    ArtifactUpdate, Job, JobStage, JobStatus, JobStatusView, SolverJob, SolverStatus, SolverUpdate,
};

/// Capacity of the event channel. A slow subscriber lags rather than
/// blocking ledger mutations.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-memory registry of solving jobs.
///
/// An explicit instance, shared via `Arc` between the pipeline controller and
/// any number of observers. `reset()` gives tests a clean slate.
pub struct JobLedger {
    jobs: Mutex<HashMap<String, Job>>,
    events: broadcast::Sender<JobEvent>,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLedger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to the typed event feed.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Drop every job. Test isolation only.
    pub fn reset(&self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.clear();
        }
    }

    /// Allocate a fresh job in `queued`/`validate`. Returns its id.
    pub fn create_job(&self, input: Option<Vec<u8>>) -> Result<String, LedgerError> {
        let job = Job::new(input);
        let job_id = job.id.clone();
        {
            let mut jobs = self.jobs.lock().map_err(|_| LedgerError::LockPoisoned)?;
            jobs.insert(job_id.clone(), job);
        }
        publish(
            &self.events,
            JobEvent::new(
                JobEventKind::JobCreated,
                &job_id,
                json!({"status": "queued", "stage": "validate"}),
            ),
        );
        Ok(job_id)
    }

    /// Lock the registry, mutate one job, bump its timestamp, then publish
    /// whatever events the mutation queued. Events are only published when
    /// the mutation succeeds.
    fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut Job, &mut Vec<JobEvent>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut pending = Vec::new();
        let result = {
            let mut jobs = self.jobs.lock().map_err(|_| LedgerError::LockPoisoned)?;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))?;
            let out = f(job, &mut pending)?;
            job.updated_at = Utc::now();
            out
        };
        for event in pending {
            publish(&self.events, event);
        }
        Ok(result)
    }

    /// Read one job without mutating it.
    fn read_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&Job) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let jobs = self.jobs.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let job = jobs
            .get(job_id)
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))?;
        f(job)
    }

    /// Transition a job's status. Terminal statuses emit their specific
    /// event kind; everything else emits `job_updated`. Once a job is
    /// terminal its status is sticky, so a controller finishing after a
    /// cancellation cannot overwrite it.
    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        self.with_job(job_id, |job, pending| {
            if job.status.is_terminal() && status != job.status {
                return Ok(());
            }
            job.status = status;
            if let Some(err) = error {
                job.error = Some(err);
            }
            let kind = match status {
                JobStatus::Completed => JobEventKind::JobCompleted,
                JobStatus::Failed => JobEventKind::JobFailed,
                JobStatus::Cancelled => JobEventKind::JobCancelled,
                JobStatus::Queued | JobStatus::Processing => JobEventKind::JobUpdated,
            };
            let data = match &job.error {
                Some(err) if status == JobStatus::Failed => {
                    json!({"status": status.as_str(), "error": err})
                }
                _ => json!({"status": status.as_str()}),
            };
            pending.push(JobEvent::new(kind, &job.id, data));
            Ok(())
        })
    }

    /// Advance a job to the given stage.
    pub fn update_stage(&self, job_id: &str, stage: JobStage) -> Result<(), LedgerError> {
        self.with_job(job_id, |job, pending| {
            job.stage = stage;
            pending.push(JobEvent::new(
                JobEventKind::StageChanged,
                &job.id,
                json!({"stage": stage.as_str()}),
            ));
            Ok(())
        })
    }

    /// Merge a partial artifact update into the job.
    pub fn update_artifacts(
        &self,
        job_id: &str,
        update: ArtifactUpdate,
    ) -> Result<(), LedgerError> {
        self.with_job(job_id, |job, pending| {
            let mut touched = Vec::new();
            if let Some(transcript) = update.transcript {
                job.artifacts.transcript = Some(transcript);
                touched.push("transcript");
            }
            if let Some(problems) = update.problems {
                job.artifacts.problems = Some(problems);
                touched.push("problems");
            }
            if let Some(graph) = update.graph {
                job.artifacts.graph = Some(graph);
                touched.push("graph");
            }
            if let Some(document) = update.document {
                job.artifacts.document = Some(document);
                touched.push("document");
            }
            if let Some(artifact) = update.artifact {
                job.artifacts.artifact = Some(artifact);
                touched.push("artifact");
            }
            pending.push(JobEvent::new(
                JobEventKind::JobUpdated,
                &job.id,
                json!({"artifacts": touched}),
            ));
            Ok(())
        })
    }

    /// Cancel a job: every currently-`solving` solver record is forced to
    /// `failed` with a cancellation error, then the job becomes `cancelled`.
    ///
    /// Cooperative only — external calls already in flight are not
    /// interrupted; their late writes land on terminal records and are
    /// dropped by [`JobLedger::update_solver_status`]. Cancelling a job that
    /// is already terminal is a no-op.
    pub fn cancel_job(&self, job_id: &str) -> Result<(), LedgerError> {
        self.with_job(job_id, |job, pending| {
            if job.status.is_terminal() {
                return Ok(());
            }
            let now = Utc::now();
            for solver in job.solvers.values_mut() {
                if solver.status == SolverStatus::Solving {
                    solver.status = SolverStatus::Failed;
                    solver.error = Some("cancelled by user".to_string());
                    solver.completed_at = Some(now);
                    pending.push(JobEvent::new(
                        JobEventKind::SolverFailed,
                        &job.id,
                        json!({"problem_id": solver.problem_id, "error": "cancelled by user"}),
                    ));
                }
            }
            job.status = JobStatus::Cancelled;
            pending.push(JobEvent::new(
                JobEventKind::JobCancelled,
                &job.id,
                serde_json::Value::Null,
            ));
            Ok(())
        })
    }

    /// Seed one `waiting` solver record per graph node, carrying the node's
    /// declared dependencies.
    pub fn initialize_solver_jobs(
        &self,
        job_id: &str,
        graph: &DependencyGraph,
    ) -> Result<(), LedgerError> {
        self.with_job(job_id, |job, pending| {
            for id in graph.nodes.keys() {
                let deps = graph.dependencies(id).to_vec();
                job.solvers
                    .insert(id.clone(), SolverJob::new(id, deps));
            }
            pending.push(JobEvent::new(
                JobEventKind::JobUpdated,
                &job.id,
                json!({"solvers_initialized": job.solvers.len()}),
            ));
            Ok(())
        })
    }

    /// Transition one solver record, applying any update payload.
    ///
    /// Returns `Ok(true)` when the transition applied and `Ok(false)` when it
    /// was absorbed as a no-op: the record (or the whole job) is already
    /// terminal, so results arriving after a cancellation are silently
    /// dropped. Genuinely illegal transitions (`waiting` straight to
    /// `completed`, anything back to `waiting`, `solving` before every
    /// dependency is complete) are errors.
    pub fn update_solver_status(
        &self,
        job_id: &str,
        problem_id: &str,
        status: SolverStatus,
        update: SolverUpdate,
    ) -> Result<bool, LedgerError> {
        self.with_job(job_id, |job, pending| {
            if job.status.is_terminal() {
                return Ok(false);
            }
            if status == SolverStatus::Solving {
                let ready = dependencies_completed(job, problem_id)?;
                if !ready {
                    return Err(LedgerError::DependenciesNotReady {
                        problem_id: problem_id.to_string(),
                    });
                }
            }
            let job_id = job.id.clone();
            let solver = job.solvers.get_mut(problem_id).ok_or_else(|| {
                LedgerError::SolverNotFound {
                    job_id: job_id.clone(),
                    problem_id: problem_id.to_string(),
                }
            })?;

            if solver.status.is_terminal() || solver.status == status {
                return Ok(false);
            }
            let valid = matches!(
                (solver.status, status),
                (SolverStatus::Waiting, SolverStatus::Solving)
                    | (SolverStatus::Solving, SolverStatus::Completed)
                    | (SolverStatus::Solving, SolverStatus::Failed)
                    | (SolverStatus::Waiting, SolverStatus::Failed)
            );
            if !valid {
                return Err(LedgerError::InvalidTransition {
                    problem_id: problem_id.to_string(),
                    from: solver.status.as_str(),
                    to: status.as_str(),
                });
            }

            solver.status = status;
            if let Some(context) = update.context {
                solver.context = Some(context);
            }
            if let Some(solution) = update.solution {
                solver.solution = Some(solution);
            }
            if let Some(attempts) = update.attempts {
                solver.attempts = attempts;
            }
            if let Some(errors) = update.errors {
                solver.errors = errors;
            }
            if let Some(error) = update.error {
                solver.error = Some(error);
            }

            let now = Utc::now();
            match status {
                SolverStatus::Solving => {
                    solver.started_at = Some(now);
                    pending.push(JobEvent::new(
                        JobEventKind::SolverStarted,
                        &job_id,
                        json!({"problem_id": problem_id}),
                    ));
                }
                SolverStatus::Completed => {
                    solver.completed_at = Some(now);
                    pending.push(JobEvent::new(
                        JobEventKind::SolverCompleted,
                        &job_id,
                        json!({"problem_id": problem_id, "attempts": solver.attempts}),
                    ));
                }
                SolverStatus::Failed => {
                    solver.completed_at = Some(now);
                    pending.push(JobEvent::new(
                        JobEventKind::SolverFailed,
                        &job_id,
                        json!({
                            "problem_id": problem_id,
                            "error": solver.error.as_deref().unwrap_or("unknown"),
                        }),
                    ));
                }
                SolverStatus::Waiting => unreachable!("validated above"),
            }
            Ok(true)
        })
    }

    /// True iff every declared dependency of the problem is `completed`.
    pub fn dependencies_ready(
        &self,
        job_id: &str,
        problem_id: &str,
    ) -> Result<bool, LedgerError> {
        self.read_job(job_id, |job| dependencies_completed(job, problem_id))
    }

    /// All `waiting` problems whose dependencies are complete, for callers
    /// that prefer pull-based scheduling over level order.
    pub fn ready_problems(&self, job_id: &str) -> Result<Vec<String>, LedgerError> {
        self.read_job(job_id, |job| {
            let mut ready: Vec<String> = job
                .solvers
                .values()
                .filter(|s| s.status == SolverStatus::Waiting)
                .filter(|s| {
                    s.dependencies.iter().all(|dep| {
                        job.solvers
                            .get(dep)
                            .is_some_and(|d| d.status == SolverStatus::Completed)
                    })
                })
                .map(|s| s.problem_id.clone())
                .collect();
            ready.sort_unstable();
            Ok(ready)
        })
    }

    /// Concatenate completed dependencies' solutions, labeled by display
    /// number, for use as solve-agent context. `None` when the problem has
    /// no completed dependencies.
    pub fn dependency_context(
        &self,
        job_id: &str,
        problem_id: &str,
    ) -> Result<Option<String>, LedgerError> {
        self.read_job(job_id, |job| {
            let solver = job.solvers.get(problem_id).ok_or_else(|| {
                LedgerError::SolverNotFound {
                    job_id: job.id.clone(),
                    problem_id: problem_id.to_string(),
                }
            })?;

            let mut sections = Vec::new();
            for dep_id in &solver.dependencies {
                let Some(dep) = job.solvers.get(dep_id) else {
                    continue;
                };
                if dep.status != SolverStatus::Completed {
                    continue;
                }
                let Some(solution) = &dep.solution else {
                    continue;
                };
                let number = job
                    .artifacts
                    .graph
                    .as_ref()
                    .and_then(|g| g.nodes.get(dep_id))
                    .map(|p| p.number.clone())
                    .unwrap_or_else(|| dep_id.clone());
                sections.push(format!("Problem {}:\n{}", number, solution));
            }

            if sections.is_empty() {
                Ok(None)
            } else {
                Ok(Some(sections.join("\n\n")))
            }
        })
    }

    /// Owned snapshot of a job.
    pub fn job(&self, job_id: &str) -> Result<Job, LedgerError> {
        self.read_job(job_id, |job| Ok(job.clone()))
    }

    /// Read-only status projection of a job.
    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, LedgerError> {
        self.read_job(job_id, |job| Ok(JobStatusView::from_job(job)))
    }

    /// Status projections for every job, newest first.
    pub fn all_statuses(&self) -> Result<Vec<JobStatusView>, LedgerError> {
        let jobs = self.jobs.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let mut views: Vec<JobStatusView> = jobs.values().map(JobStatusView::from_job).collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(views)
    }
}

fn dependencies_completed(job: &Job, problem_id: &str) -> Result<bool, LedgerError> {
    let solver = job
        .solvers
        .get(problem_id)
        .ok_or_else(|| LedgerError::SolverNotFound {
            job_id: job.id.clone(),
            problem_id: problem_id.to_string(),
        })?;
    Ok(solver.dependencies.iter().all(|dep| {
        job.solvers
            .get(dep)
            .is_some_and(|d| d.status == SolverStatus::Completed)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::problem::Problem;

    fn problem(id: &str, deps: Vec<&str>) -> Problem {
        Problem::new(id, id, &format!("problem {id}"))
            .with_dependencies(deps.into_iter().map(String::from).collect())
    }

    /// Ledger with one job seeded from 1 <- 2, 3.
    fn seeded_ledger() -> (JobLedger, String) {
        let ledger = JobLedger::new();
        let job_id = ledger.create_job(Some(b"input".to_vec())).unwrap();
        let graph = GraphBuilder::new(vec![
            problem("1", vec![]),
            problem("2", vec!["1"]),
            problem("3", vec![]),
        ])
        .build();
        ledger
            .update_artifacts(
                &job_id,
                ArtifactUpdate {
                    graph: Some(graph.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        ledger.initialize_solver_jobs(&job_id, &graph).unwrap();
        (ledger, job_id)
    }

    fn complete(ledger: &JobLedger, job_id: &str, problem_id: &str, solution: &str) {
        ledger
            .update_solver_status(
                job_id,
                problem_id,
                SolverStatus::Solving,
                SolverUpdate::default(),
            )
            .unwrap();
        ledger
            .update_solver_status(
                job_id,
                problem_id,
                SolverStatus::Completed,
                SolverUpdate::solved(solution.to_string(), 1, vec![]),
            )
            .unwrap();
    }

    #[test]
    fn test_create_job_starts_queued() {
        let ledger = JobLedger::new();
        let job_id = ledger.create_job(None).unwrap();
        let view = ledger.job_status(&job_id).unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.stage, JobStage::Validate);
    }

    #[test]
    fn test_unknown_job_is_an_error() {
        let ledger = JobLedger::new();
        assert!(matches!(
            ledger.job_status("missing"),
            Err(LedgerError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_initialize_creates_waiting_solvers_with_deps() {
        let (ledger, job_id) = seeded_ledger();
        let job = ledger.job(&job_id).unwrap();
        assert_eq!(job.solvers.len(), 3);
        assert_eq!(job.solvers["2"].status, SolverStatus::Waiting);
        assert_eq!(job.solvers["2"].dependencies, vec!["1"]);
        assert!(job.solvers["1"].dependencies.is_empty());
    }

    #[test]
    fn test_solving_requires_completed_dependencies() {
        let (ledger, job_id) = seeded_ledger();
        let result = ledger.update_solver_status(
            &job_id,
            "2",
            SolverStatus::Solving,
            SolverUpdate::default(),
        );
        assert!(matches!(
            result,
            Err(LedgerError::DependenciesNotReady { .. })
        ));

        complete(&ledger, &job_id, "1", "solution one");
        assert!(ledger.dependencies_ready(&job_id, "2").unwrap());
        assert!(ledger
            .update_solver_status(&job_id, "2", SolverStatus::Solving, SolverUpdate::default())
            .unwrap());
    }

    #[test]
    fn test_ready_problems_pull_model() {
        let (ledger, job_id) = seeded_ledger();
        assert_eq!(ledger.ready_problems(&job_id).unwrap(), vec!["1", "3"]);

        complete(&ledger, &job_id, "1", "done");
        assert_eq!(ledger.ready_problems(&job_id).unwrap(), vec!["2", "3"]);
    }

    #[test]
    fn test_terminal_solver_status_is_sticky() {
        let (ledger, job_id) = seeded_ledger();
        complete(&ledger, &job_id, "1", "the answer");

        // A late failure report against the completed record is absorbed.
        let applied = ledger
            .update_solver_status(
                &job_id,
                "1",
                SolverStatus::Failed,
                SolverUpdate::failed("late".into(), 5, vec![]),
            )
            .unwrap();
        assert!(!applied);
        let job = ledger.job(&job_id).unwrap();
        assert_eq!(job.solvers["1"].status, SolverStatus::Completed);
        assert_eq!(job.solvers["1"].solution.as_deref(), Some("the answer"));
    }

    #[test]
    fn test_waiting_to_completed_is_invalid() {
        let (ledger, job_id) = seeded_ledger();
        let result = ledger.update_solver_status(
            &job_id,
            "1",
            SolverStatus::Completed,
            SolverUpdate::default(),
        );
        assert!(matches!(
            result,
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_fails_solving_and_spares_completed() {
        let (ledger, job_id) = seeded_ledger();
        complete(&ledger, &job_id, "1", "kept");
        ledger
            .update_solver_status(&job_id, "3", SolverStatus::Solving, SolverUpdate::default())
            .unwrap();

        ledger.cancel_job(&job_id).unwrap();

        let job = ledger.job(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.solvers["1"].status, SolverStatus::Completed);
        assert_eq!(job.solvers["3"].status, SolverStatus::Failed);
        assert_eq!(job.solvers["3"].error.as_deref(), Some("cancelled by user"));
        // Untouched waiting record stays waiting.
        assert_eq!(job.solvers["2"].status, SolverStatus::Waiting);
    }

    #[test]
    fn test_writes_after_cancellation_are_noops() {
        let (ledger, job_id) = seeded_ledger();
        ledger
            .update_solver_status(&job_id, "1", SolverStatus::Solving, SolverUpdate::default())
            .unwrap();
        ledger.cancel_job(&job_id).unwrap();

        // The in-flight task finishes and reports success; the result is dropped.
        let applied = ledger
            .update_solver_status(
                &job_id,
                "1",
                SolverStatus::Completed,
                SolverUpdate::solved("too late".into(), 1, vec![]),
            )
            .unwrap();
        assert!(!applied);
        let job = ledger.job(&job_id).unwrap();
        assert_eq!(job.solvers["1"].status, SolverStatus::Failed);
        assert!(job.solvers["1"].solution.is_none());
    }

    #[test]
    fn test_dependency_context_labeled_by_number() {
        let (ledger, job_id) = seeded_ledger();
        complete(&ledger, &job_id, "1", "x = 4");

        let context = ledger.dependency_context(&job_id, "2").unwrap();
        assert_eq!(context.as_deref(), Some("Problem 1:\nx = 4"));

        // No completed dependencies -> no context.
        assert!(ledger.dependency_context(&job_id, "3").unwrap().is_none());
    }

    #[test]
    fn test_events_emitted_in_causal_order() {
        let ledger = JobLedger::new();
        let mut rx = ledger.subscribe();

        let job_id = ledger.create_job(None).unwrap();
        ledger
            .update_status(&job_id, JobStatus::Processing, None)
            .unwrap();
        ledger.update_stage(&job_id, JobStage::Transcribe).unwrap();
        ledger
            .update_status(&job_id, JobStatus::Completed, None)
            .unwrap();

        let kinds: Vec<JobEventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                JobEventKind::JobCreated,
                JobEventKind::JobUpdated,
                JobEventKind::StageChanged,
                JobEventKind::JobCompleted,
            ]
        );
    }

    #[test]
    fn test_failed_job_event_carries_error() {
        let ledger = JobLedger::new();
        let mut rx = ledger.subscribe();
        let job_id = ledger.create_job(None).unwrap();
        ledger
            .update_status(&job_id, JobStatus::Failed, Some("bad input".into()))
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let failed = events
            .iter()
            .find(|e| e.kind == JobEventKind::JobFailed)
            .unwrap();
        assert_eq!(failed.data["error"], "bad input");
    }

    #[test]
    fn test_reset_clears_jobs() {
        let (ledger, job_id) = seeded_ledger();
        ledger.reset();
        assert!(ledger.job(&job_id).is_err());
        assert!(ledger.all_statuses().unwrap().is_empty());
    }
}
