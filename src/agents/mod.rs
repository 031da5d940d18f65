//! Reference implementations of the external collaborator traits.
//!
//! The pipeline itself only knows the traits in `crate::solver`; these are
//! the subprocess-backed implementations the CLI wires in.

mod claude;
mod tex;

pub use claude::ClaudeAgent;
pub use tex::TexValidator;
