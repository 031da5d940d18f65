//! In-memory job registry and event feed.
//!
//! The ledger owns every `Job` and `SolverJob` record. State transitions,
//! timestamps, and event notifications all flow through it:
//!
//! 1. **Job records** — created on submission, advanced through stages by
//!    the pipeline controller, terminated in completed/failed/cancelled.
//! 2. **Solver records** — one per problem, tracking the solve/validate
//!    retry loop; transitions are validated and terminal states are sticky.
//! 3. **Events** — every mutation publishes a typed `JobEvent` on a
//!    broadcast channel for progress UIs and tests.

mod events;
mod job;
mod store;

pub use events::{JobEvent, JobEventKind};
pub use job::{
    ArtifactUpdate, Job, JobArtifacts, JobStage, JobStatus, JobStatusView, SolveCounts, SolverJob,
    SolverStatus, SolverUpdate,
};
pub use store::JobLedger;
