//! Terminal progress rendering, driven by ledger events.
//!
//! Two `indicatif` bars stacked via `MultiProgress`: a spinner tracking the
//! current stage, and a bar tracking solver completions once the solve stage
//! begins. The UI is a passive event consumer — feed it from a
//! `JobLedger::subscribe` receiver.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::ledger::{JobEvent, JobEventKind};

pub struct SolveUi {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    solver_bar: ProgressBar,
    failed: u64,
}

impl Default for SolveUi {
    fn default() -> Self {
        Self::new()
    }
}

impl SolveUi {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stage");
        stage_bar.enable_steady_tick(std::time::Duration::from_millis(120));

        let solver_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let solver_bar = multi.add(ProgressBar::new(0));
        solver_bar.set_style(solver_style);
        solver_bar.set_prefix("Solve");

        Self {
            multi,
            stage_bar,
            solver_bar,
            failed: 0,
        }
    }

    /// Apply one ledger event to the display.
    pub fn handle_event(&mut self, event: &JobEvent) {
        match event.kind {
            JobEventKind::StageChanged => {
                if let Some(stage) = event.data.get("stage").and_then(|s| s.as_str()) {
                    self.stage_bar.set_message(stage_label(stage).to_string());
                }
            }
            JobEventKind::JobUpdated => {
                if let Some(total) = event
                    .data
                    .get("solvers_initialized")
                    .and_then(|n| n.as_u64())
                {
                    self.solver_bar.set_length(total);
                }
            }
            JobEventKind::SolverStarted => {
                if let Some(id) = event.data.get("problem_id").and_then(|s| s.as_str()) {
                    self.solver_bar.set_message(format!("problem {}", id));
                }
            }
            JobEventKind::SolverCompleted => {
                self.solver_bar.inc(1);
            }
            JobEventKind::SolverFailed => {
                self.failed += 1;
                self.solver_bar.inc(1);
                self.solver_bar
                    .set_message(format!("{} failed", self.failed));
            }
            JobEventKind::JobCompleted => {
                self.finish(&format!("{}", style("Completed").green().bold()));
            }
            JobEventKind::JobFailed => {
                let error = event
                    .data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error");
                self.finish(&format!("{} {}", style("Failed:").red().bold(), error));
            }
            JobEventKind::JobCancelled => {
                self.finish(&format!("{}", style("Cancelled").yellow().bold()));
            }
            JobEventKind::JobCreated => {}
        }
    }

    fn finish(&self, message: &str) {
        self.stage_bar.finish_with_message(message.to_string());
        self.solver_bar.finish();
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }
}

fn stage_label(stage: &str) -> &'static str {
    match stage {
        "validate" => "validating input",
        "transcribe" => "transcribing document",
        "chunk" => "splitting into problems",
        "build_graph" => "building dependency graph",
        "solve" => "solving problems",
        "synthesize" => "assembling document",
        "final_compile" => "compiling document",
        _ => "working",
    }
}
