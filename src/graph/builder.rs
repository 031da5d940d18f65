//! Graph builder for constructing dependency graphs from problem lists.
//!
//! The builder takes the flattened problem list (already annotated with
//! `dependencies` by the reference-detection agent) and produces a directed
//! acyclic graph plus a leveled topological order for parallel scheduling.

use crate::problem::Problem;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A directed acyclic graph of problems with a leveled execution order.
///
/// Edges point from dependent to dependency. Each level is a batch of
/// problem ids with no dependency edges among its members: everything a
/// level-`k` member depends on sits in a level `< k`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DependencyGraph {
    /// Problems indexed by id.
    pub nodes: HashMap<String, Problem>,
    /// Id -> ids it depends on.
    pub edges: HashMap<String, Vec<String>>,
    /// Parallel execution order. Members of one level are independent.
    pub levels: Vec<Vec<String>>,
    /// Ids excluded from `levels` because they sit on a dependency cycle.
    /// These are never scheduled.
    pub cyclic: Vec<String>,
}

impl DependencyGraph {
    /// Number of problems in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependency ids of a problem. Empty slice for unknown ids.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.edges.get(id).map_or(&[], |v| v.as_slice())
    }

    /// True if a cycle was detected during construction.
    pub fn has_cycles(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Builder for dependency graphs.
pub struct GraphBuilder {
    problems: Vec<Problem>,
}

impl GraphBuilder {
    /// Create a new builder over a flattened problem list.
    pub fn new(problems: Vec<Problem>) -> Self {
        Self { problems }
    }

    /// Build the graph and compute its levels.
    ///
    /// Kahn's algorithm over remaining-dependency counts: the frontier of
    /// problems with no unresolved dependencies becomes one level, resolving
    /// a frontier member releases its dependents, repeat. Never fails:
    /// - dependency ids that name no known problem are dropped with a warning;
    /// - problems caught in a cycle are reported on the graph and excluded
    ///   from the level list, so they are simply never scheduled.
    pub fn build(self) -> DependencyGraph {
        let mut nodes: HashMap<String, Problem> = HashMap::new();
        for problem in &self.problems {
            if nodes.insert(problem.id.clone(), problem.clone()).is_some() {
                warn!(id = %problem.id, "duplicate problem id, keeping the later one");
            }
        }

        // Edges, with unknown dependency ids filtered out.
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for problem in &self.problems {
            let deps: Vec<String> = problem
                .dependencies
                .iter()
                .filter(|dep| {
                    let known = nodes.contains_key(*dep);
                    if !known {
                        warn!(
                            problem = %problem.id,
                            dependency = %dep,
                            "dependency references unknown problem, ignoring"
                        );
                    }
                    known
                })
                .cloned()
                .collect();
            edges.insert(problem.id.clone(), deps);
        }

        // Reverse index: id -> ids that depend on it.
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (id, deps) in &edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        // Leveled topological order.
        let mut remaining: HashMap<&str, usize> = edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        loop {
            let mut frontier: Vec<&str> = remaining
                .iter()
                .filter(|(id, count)| **count == 0 && !placed.contains(**id))
                .map(|(id, _)| *id)
                .collect();
            if frontier.is_empty() {
                break;
            }
            frontier.sort_unstable();

            for &id in &frontier {
                placed.insert(id);
                for dependent in dependents.get(id).map_or(&[][..], |v| v.as_slice()) {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                    }
                }
            }
            levels.push(frontier.into_iter().map(String::from).collect());
        }

        // Anything unplaced is on a cycle.
        let mut cyclic: Vec<String> = nodes
            .keys()
            .filter(|id| !placed.contains(id.as_str()))
            .cloned()
            .collect();
        cyclic.sort_unstable();

        if !cyclic.is_empty() {
            warn!(
                problems = ?cyclic,
                "dependency cycle detected, affected problems will not be scheduled"
            );
        }

        DependencyGraph {
            nodes,
            edges,
            levels,
            cyclic,
        }
    }
}
