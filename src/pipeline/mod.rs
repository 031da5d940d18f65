//! Job pipeline: stage sequencing, solve fan-out, document assembly.
//!
//! ## Architecture
//!
//! The controller is the only writer that advances a job:
//!
//! 1. **Stages** — validate → transcribe → chunk → build-graph → solve →
//!    synthesize → final-compile, strictly in order, any stage error failing
//!    the job.
//! 2. **Solve fan-out** — the dependency graph's levels run sequentially;
//!    items inside a level run concurrently, capped by the configured
//!    semaphore.
//! 3. **Synthesis** — mechanical assembly of the problem tree with each
//!    item's solution or an unsolved marker.

mod controller;
mod synthesize;

pub use controller::PipelineController;
pub use synthesize::synthesize_document;
