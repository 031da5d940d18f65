//! Problem data model.
//!
//! A problem set is a tree: top-level problems may carry sub-problems
//! ("1.a", "1.a.i", ...), and any problem may explicitly reference other
//! problems it depends on. The chunking agent produces this tree; the graph
//! builder and the ledger consume the flattened form.

use serde::{Deserialize, Serialize};

/// One unit of work in a problem set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Globally unique id within a job; encodes hierarchical position
    /// (e.g. "1", "1.a", "1.a.i").
    pub id: String,
    /// Id of the enclosing problem, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Display number as it appears in the source document.
    pub number: String,
    /// Free-form problem text.
    pub text: String,
    /// Hierarchy depth, 0 = top level.
    #[serde(default)]
    pub depth: u32,
    /// Sub-problems, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Problem>,
    /// Ids of other problems this one explicitly references. Never includes
    /// the parent/child relation.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Problem {
    /// Create a leaf problem with no parent and no dependencies.
    pub fn new(id: &str, number: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: None,
            number: number.to_string(),
            text: text.to_string(),
            depth: 0,
            children: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the dependency ids.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Attach sub-problems; fixes up their parent id and depth.
    pub fn with_children(mut self, children: Vec<Problem>) -> Self {
        self.children = children;
        for child in &mut self.children {
            child.parent_id = Some(self.id.clone());
            child.set_depth(self.depth + 1);
        }
        self
    }

    fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
        for child in &mut self.children {
            child.parent_id = Some(self.id.clone());
            child.set_depth(depth + 1);
        }
    }

    /// True if this problem has no sub-problems.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Flatten a problem tree into depth-first document order. Children keep
/// their `children` field intact on the returned clones; consumers that only
/// need the flat view index by id.
pub fn flatten(problems: &[Problem]) -> Vec<Problem> {
    let mut flat = Vec::new();
    for problem in problems {
        flat.push(problem.clone());
        flat.extend(flatten(&problem.children));
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_children_sets_parent_and_depth() {
        let p = Problem::new("1", "1", "outer").with_children(vec![
            Problem::new("1.a", "a", "inner")
                .with_children(vec![Problem::new("1.a.i", "i", "innermost")]),
        ]);

        assert_eq!(p.depth, 0);
        assert_eq!(p.children[0].depth, 1);
        assert_eq!(p.children[0].parent_id.as_deref(), Some("1"));
        assert_eq!(p.children[0].children[0].depth, 2);
        assert_eq!(p.children[0].children[0].parent_id.as_deref(), Some("1.a"));
    }

    #[test]
    fn test_flatten_depth_first_order() {
        let problems = vec![
            Problem::new("1", "1", "first")
                .with_children(vec![Problem::new("1.a", "a", "sub")]),
            Problem::new("2", "2", "second"),
        ];

        let flat = flatten(&problems);
        let ids: Vec<&str> = flat.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1.a", "2"]);
    }

    #[test]
    fn test_problem_round_trips_through_json() {
        let p = Problem::new("3", "3", "prove it").with_dependencies(vec!["1".to_string()]);
        let json = serde_json::to_string(&p).unwrap();
        let back: Problem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "3");
        assert_eq!(back.dependencies, vec!["1"]);
        assert!(back.is_leaf());
    }
}
