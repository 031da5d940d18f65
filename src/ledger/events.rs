//! Typed event notifications emitted by the ledger.
//!
//! Every mutation of a Job or SolverJob produces one `JobEvent` on a
//! `tokio::sync::broadcast` channel. Subscribers filter by `kind`; a lagging
//! or absent subscriber never blocks the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kinds of ledger events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobCreated,
    JobUpdated,
    StageChanged,
    SolverStarted,
    SolverCompleted,
    SolverFailed,
    JobCompleted,
    JobFailed,
    JobCancelled,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCreated => "job_created",
            Self::JobUpdated => "job_updated",
            Self::StageChanged => "stage_changed",
            Self::SolverStarted => "solver_started",
            Self::SolverCompleted => "solver_completed",
            Self::SolverFailed => "solver_failed",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobCancelled => "job_cancelled",
        }
    }
}

/// One ledger notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload (stage, solver status, error text, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job_id: &str, data: serde_json::Value) -> Self {
        Self {
            kind,
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Send an event to all current subscribers. A send error only means nobody
/// is listening, which is fine.
pub fn publish(tx: &broadcast::Sender<JobEvent>, event: JobEvent) {
    let _ = tx.send(event);
}
