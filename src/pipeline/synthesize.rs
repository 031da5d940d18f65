//! Mechanical assembly of the output document.
//!
//! No agent is involved here: the ordered problem tree is walked depth-first
//! and each problem contributes its text plus its solution, or an unsolved
//! marker when the solve stage could not produce one.

use std::collections::HashMap;

use crate::ledger::{SolverJob, SolverStatus};
use crate::problem::Problem;

/// Assemble the final document from the problem tree and the solver records.
pub fn synthesize_document(problems: &[Problem], solvers: &HashMap<String, SolverJob>) -> String {
    let mut sections = Vec::new();
    for problem in problems {
        render_problem(problem, solvers, &mut sections);
    }
    sections.join("\n\n") + "\n"
}

fn render_problem(
    problem: &Problem,
    solvers: &HashMap<String, SolverJob>,
    sections: &mut Vec<String>,
) {
    let heading = "#".repeat((problem.depth as usize + 2).min(6));
    sections.push(format!(
        "{} Problem {}\n\n{}",
        heading, problem.number, problem.text
    ));
    sections.push(render_solution(&problem.id, solvers));
    for child in &problem.children {
        render_problem(child, solvers, sections);
    }
}

fn render_solution(problem_id: &str, solvers: &HashMap<String, SolverJob>) -> String {
    let Some(solver) = solvers.get(problem_id) else {
        return "*Unsolved.*".to_string();
    };
    match solver.status {
        SolverStatus::Completed => solver
            .solution
            .clone()
            .unwrap_or_else(|| "*Unsolved.*".to_string()),
        SolverStatus::Failed => format!(
            "*Unsolved — no solution after {} attempt{}{}.*",
            solver.attempts,
            if solver.attempts == 1 { "" } else { "s" },
            solver
                .error
                .as_deref()
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        ),
        SolverStatus::Waiting => "*Unsolved — blocked on an unsolved dependency.*".to_string(),
        SolverStatus::Solving => "*Unsolved.*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver(problem_id: &str, status: SolverStatus) -> SolverJob {
        let mut s = SolverJob::new(problem_id, vec![]);
        s.status = status;
        s
    }

    #[test]
    fn test_solved_problems_carry_their_solutions() {
        let problems = vec![
            Problem::new("1", "1", "What is 2 + 2?"),
            Problem::new("2", "2", "What is 3 + 3?"),
        ];
        let mut solvers = HashMap::new();
        let mut one = solver("1", SolverStatus::Completed);
        one.solution = Some("4".to_string());
        solvers.insert("1".to_string(), one);
        let mut two = solver("2", SolverStatus::Completed);
        two.solution = Some("6".to_string());
        solvers.insert("2".to_string(), two);

        let doc = synthesize_document(&problems, &solvers);
        assert!(doc.contains("## Problem 1"));
        assert!(doc.contains("What is 2 + 2?"));
        assert!(doc.contains("\n4"));
        assert!(doc.contains("\n6"));
    }

    #[test]
    fn test_failed_problem_marked_unsolved_with_error() {
        let problems = vec![Problem::new("1", "1", "Impossible")];
        let mut solvers = HashMap::new();
        let mut failed = solver("1", SolverStatus::Failed);
        failed.attempts = 3;
        failed.error = Some("undefined control sequence".to_string());
        solvers.insert("1".to_string(), failed);

        let doc = synthesize_document(&problems, &solvers);
        assert!(doc.contains("no solution after 3 attempts"));
        assert!(doc.contains("undefined control sequence"));
    }

    #[test]
    fn test_waiting_problem_marked_blocked() {
        let problems = vec![Problem::new("2", "2", "Depends on 1")];
        let mut solvers = HashMap::new();
        solvers.insert("2".to_string(), solver("2", SolverStatus::Waiting));

        let doc = synthesize_document(&problems, &solvers);
        assert!(doc.contains("blocked on an unsolved dependency"));
    }

    #[test]
    fn test_children_render_after_parent_with_deeper_headings() {
        let problems = vec![
            Problem::new("1", "1", "Consider f(x) = x^2.")
                .with_children(vec![Problem::new("1.a", "a", "Differentiate f.")]),
        ];
        let mut solvers = HashMap::new();
        let mut sub = solver("1.a", SolverStatus::Completed);
        sub.solution = Some("f'(x) = 2x".to_string());
        solvers.insert("1.a".to_string(), sub);
        solvers.insert("1".to_string(), solver("1", SolverStatus::Waiting));

        let doc = synthesize_document(&problems, &solvers);
        let parent_pos = doc.find("## Problem 1").unwrap();
        let child_pos = doc.find("### Problem a").unwrap();
        assert!(parent_pos < child_pos);
        assert!(doc.contains("f'(x) = 2x"));
    }
}
