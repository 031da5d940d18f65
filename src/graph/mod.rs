//! Dependency graph construction for parallel problem scheduling.
//!
//! A chunked problem set carries explicit cross-references ("using the result
//! of problem 2..."). This module turns that flat, annotated list into a DAG
//! and a leveled topological order: each level is a batch of problems whose
//! dependencies are all resolved by earlier levels, so the members of one
//! level can be solved concurrently.
//!
//! Cycles are possible when the upstream reference detection misfires. They
//! are reported on the graph and the affected problems are excluded from the
//! level list — a cycle costs those problems their solutions, never the job.
//!
//! ## Example
//!
//! ```
//! use solvent::graph::GraphBuilder;
//! use solvent::problem::Problem;
//!
//! let problems = vec![
//!     Problem::new("1", "1", "Define f"),
//!     Problem::new("2", "2", "Integrate f").with_dependencies(vec!["1".to_string()]),
//!     Problem::new("3", "3", "Unrelated"),
//! ];
//!
//! let graph = GraphBuilder::new(problems).build();
//! assert_eq!(graph.levels, vec![vec!["1", "3"], vec!["2"]]);
//! ```

mod builder;

pub use builder::{DependencyGraph, GraphBuilder};
