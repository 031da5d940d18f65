use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::problem::Problem;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered processing stages of a job. No skipping, no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Validate,
    Transcribe,
    Chunk,
    BuildGraph,
    Solve,
    Synthesize,
    FinalCompile,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Transcribe => "transcribe",
            Self::Chunk => "chunk",
            Self::BuildGraph => "build_graph",
            Self::Solve => "solve",
            Self::Synthesize => "synthesize",
            Self::FinalCompile => "final_compile",
        }
    }

    /// All stages in execution order.
    pub fn ordered() -> [JobStage; 7] {
        [
            Self::Validate,
            Self::Transcribe,
            Self::Chunk,
            Self::BuildGraph,
            Self::Solve,
            Self::Synthesize,
            Self::FinalCompile,
        ]
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one problem's solve/validate loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Waiting,
    Solving,
    Completed,
    Failed,
}

impl SolverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Solving => "solving",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-problem tracking record for the solve/validate retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverJob {
    pub id: String,
    pub problem_id: String,
    pub status: SolverStatus,
    /// Problem ids this one is blocked on.
    pub dependencies: Vec<String>,
    /// Context assembled from completed dependencies' solutions.
    pub context: Option<String>,
    pub solution: Option<String>,
    /// Compilation attempts consumed so far.
    pub attempts: u32,
    /// Validation error log, one entry per failed attempt.
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SolverJob {
    pub fn new(problem_id: &str, dependencies: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            problem_id: problem_id.to_string(),
            status: SolverStatus::Waiting,
            dependencies,
            context: None,
            solution: None,
            attempts: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Partial update applied to a SolverJob alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct SolverUpdate {
    pub context: Option<String>,
    pub solution: Option<String>,
    pub attempts: Option<u32>,
    pub errors: Option<Vec<String>>,
    pub error: Option<String>,
}

impl SolverUpdate {
    pub fn with_context(context: Option<String>) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn solved(solution: String, attempts: u32, errors: Vec<String>) -> Self {
        Self {
            solution: Some(solution),
            attempts: Some(attempts),
            errors: Some(errors),
            ..Default::default()
        }
    }

    pub fn failed(error: String, attempts: u32, errors: Vec<String>) -> Self {
        Self {
            attempts: Some(attempts),
            errors: Some(errors),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Intermediate and final artifacts accumulated as a job advances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArtifacts {
    /// Transcribed source text.
    pub transcript: Option<String>,
    /// Problem tree produced by chunking, document order.
    pub problems: Option<Vec<Problem>>,
    /// Dependency graph over the flattened problems.
    pub graph: Option<DependencyGraph>,
    /// Synthesized output document.
    pub document: Option<String>,
    /// Final compiled artifact (e.g. a PDF).
    #[serde(skip)]
    pub artifact: Option<Vec<u8>>,
}

/// Partial artifact update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUpdate {
    pub transcript: Option<String>,
    pub problems: Option<Vec<Problem>>,
    pub graph: Option<DependencyGraph>,
    pub document: Option<String>,
    pub artifact: Option<Vec<u8>>,
}

/// One tracked solving job. Owned exclusively by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    /// Raw uploaded input.
    #[serde(skip)]
    pub input: Option<Vec<u8>>,
    pub artifacts: JobArtifacts,
    /// Problem id -> solver record.
    pub solvers: HashMap<String, SolverJob>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(input: Option<Vec<u8>>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            stage: JobStage::Validate,
            input,
            artifacts: JobArtifacts::default(),
            solvers: HashMap::new(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Count solver records per status.
    pub fn solver_counts(&self) -> SolveCounts {
        let mut counts = SolveCounts::default();
        for solver in self.solvers.values() {
            match solver.status {
                SolverStatus::Waiting => counts.waiting += 1,
                SolverStatus::Solving => counts.solving += 1,
                SolverStatus::Completed => counts.completed += 1,
                SolverStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Solver tallies during the solve stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveCounts {
    pub completed: usize,
    pub failed: usize,
    pub solving: usize,
    pub waiting: usize,
}

impl SolveCounts {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.solving + self.waiting
    }
}

/// Read-only job snapshot for polling UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    /// Human-readable progress line.
    pub progress: String,
    /// Present while the job is in the solve stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solvers: Option<SolveCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusView {
    pub(crate) fn from_job(job: &Job) -> Self {
        let counts = (job.stage == JobStage::Solve && !job.solvers.is_empty())
            .then(|| job.solver_counts());
        Self {
            job_id: job.id.clone(),
            status: job.status,
            stage: job.stage,
            progress: describe_progress(job, counts.as_ref()),
            solvers: counts,
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

fn describe_progress(job: &Job, counts: Option<&SolveCounts>) -> String {
    match job.status {
        JobStatus::Queued => "Waiting in queue".to_string(),
        JobStatus::Completed => "Completed".to_string(),
        JobStatus::Cancelled => "Cancelled".to_string(),
        JobStatus::Failed => match &job.error {
            Some(err) => format!("Failed: {}", err),
            None => "Failed".to_string(),
        },
        JobStatus::Processing => match job.stage {
            JobStage::Validate => "Validating input".to_string(),
            JobStage::Transcribe => "Transcribing document".to_string(),
            JobStage::Chunk => "Splitting document into problems".to_string(),
            JobStage::BuildGraph => "Building dependency graph".to_string(),
            JobStage::Solve => match counts {
                Some(c) => format!(
                    "Solving problems ({}/{} solved, {} failed, {} in flight)",
                    c.completed,
                    c.total(),
                    c.failed,
                    c.solving
                ),
                None => "Solving problems".to_string(),
            },
            JobStage::Synthesize => "Assembling final document".to_string(),
            JobStage::FinalCompile => "Compiling final document".to_string(),
        },
    }
}
