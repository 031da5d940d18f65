//! Solve/ingest agent backed by the `claude` CLI.
//!
//! Each call spawns one `claude --print` subprocess with a purpose-built
//! prompt and reads the reply from stdout. Structured replies (chunking,
//! reference detection) are requested as JSON and extracted from the output
//! even when the model wraps them in prose.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;

use crate::problem::Problem;
use crate::solver::{IngestAgent, SolveAgent};

/// Agent that shells out to the `claude` CLI.
pub struct ClaudeAgent {
    cmd: String,
}

impl ClaudeAgent {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
        }
    }

    async fn prompt(&self, prompt: &str) -> Result<String> {
        let output = Command::new(&self.cmd)
            .arg("--print")
            .arg("--dangerously-skip-permissions")
            .arg(prompt)
            .env_remove("CLAUDECODE")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn agent process '{}'", self.cmd))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "agent process exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("agent output was not UTF-8")?;
        Ok(stdout.trim().to_string())
    }
}

#[async_trait]
impl SolveAgent for ClaudeAgent {
    async fn solve(
        &self,
        problem: &Problem,
        dependency_context: Option<&str>,
        prior_errors: &[String],
    ) -> Result<String> {
        let prompt = build_solve_prompt(problem, dependency_context, prior_errors);
        self.prompt(&prompt).await
    }
}

#[async_trait]
impl IngestAgent for ClaudeAgent {
    async fn transcribe(&self, input: &[u8]) -> Result<String> {
        // Text uploads pass through as-is; anything else needs an
        // OCR-capable transcription front end this agent does not have.
        let text = std::str::from_utf8(input)
            .context("input is not UTF-8 text; transcription of binary uploads is unsupported")?;
        Ok(text.to_string())
    }

    async fn chunk(&self, transcript: &str) -> Result<Vec<Problem>> {
        let prompt = build_chunk_prompt(transcript);
        let reply = self.prompt(&prompt).await?;
        parse_problem_json(&reply).context("agent returned unparseable chunking output")
    }

    async fn detect_references(&self, problems: Vec<Problem>) -> Result<Vec<Problem>> {
        let listing = serde_json::to_string_pretty(&problems)?;
        let prompt = build_reference_prompt(&listing);
        let reply = self.prompt(&prompt).await?;
        parse_problem_json(&reply).context("agent returned unparseable reference output")
    }
}

fn build_solve_prompt(
    problem: &Problem,
    dependency_context: Option<&str>,
    prior_errors: &[String],
) -> String {
    let mut prompt = format!(
        "Solve the following problem. Reply with only the solution text, \
         ready to be inserted into the final document.\n\nProblem {}:\n{}\n",
        problem.number, problem.text
    );
    if let Some(context) = dependency_context {
        prompt.push_str(&format!(
            "\nResults from problems this one builds on:\n{}\n",
            context
        ));
    }
    if !prior_errors.is_empty() {
        prompt.push_str(
            "\nEarlier attempts at this problem failed validation. \
             Fix the issues below in your next solution:\n",
        );
        for (i, error) in prior_errors.iter().enumerate() {
            prompt.push_str(&format!("\nAttempt {} error:\n{}\n", i + 1, error));
        }
    }
    prompt
}

fn build_chunk_prompt(transcript: &str) -> String {
    format!(
        "Split this document into its individual problems. Reply with only a \
         JSON array; each element has \"id\" (hierarchical, e.g. \"1\", \"1.a\"), \
         \"number\", \"text\", and optionally \"children\" (same shape).\n\n{}",
        transcript
    )
}

fn build_reference_prompt(listing: &str) -> String {
    format!(
        "For each problem below, find the other problems it explicitly \
         references (\"using the result of problem 2\", \"from part (a)\", ...). \
         Reply with only the same JSON array, adding a \"dependencies\" field \
         of referenced problem ids to each element. Never list a problem's own \
         parent or children as dependencies.\n\n{}",
        listing
    )
}

/// Pull a JSON array out of a model reply that may wrap it in prose or a
/// code fence.
fn parse_problem_json(reply: &str) -> Result<Vec<Problem>> {
    if let Ok(problems) = serde_json::from_str::<Vec<Problem>>(reply.trim()) {
        return Ok(problems);
    }
    let start = reply.find('[').context("no JSON array in agent output")?;
    let end = reply.rfind(']').context("no closing bracket in agent output")?;
    if end <= start {
        bail!("malformed JSON array in agent output");
    }
    serde_json::from_str(&reply[start..=end]).context("invalid problem JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_solve_prompt_includes_context_and_errors() {
        let problem = Problem::new("2", "2", "Integrate f over [0,1].");
        let prompt = build_solve_prompt(
            &problem,
            Some("Problem 1:\nf(x) = 2x"),
            &["missing \\end{align}".to_string()],
        );

        assert!(prompt.contains("Problem 2:"));
        assert!(prompt.contains("Integrate f over [0,1]."));
        assert!(prompt.contains("f(x) = 2x"));
        assert!(prompt.contains("Attempt 1 error:"));
        assert!(prompt.contains("missing \\end{align}"));
    }

    #[test]
    fn test_solve_prompt_omits_empty_sections() {
        let problem = Problem::new("1", "1", "Compute.");
        let prompt = build_solve_prompt(&problem, None, &[]);
        assert!(!prompt.contains("builds on"));
        assert!(!prompt.contains("failed validation"));
    }

    #[test]
    fn test_parse_problem_json_plain_array() {
        let reply = r#"[{"id": "1", "number": "1", "text": "Compute 2+2."}]"#;
        let problems = parse_problem_json(reply).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].id, "1");
    }

    #[test]
    fn test_parse_problem_json_embedded_in_prose() {
        let reply = "Here are the problems:\n```json\n[{\"id\": \"1\", \"number\": \"1\", \"text\": \"x\"}]\n```\nDone.";
        let problems = parse_problem_json(reply).unwrap();
        assert_eq!(problems[0].text, "x");
    }

    #[test]
    fn test_parse_problem_json_rejects_garbage() {
        assert!(parse_problem_json("no json here").is_err());
    }

    #[tokio::test]
    async fn test_transcribe_passes_through_text() {
        let agent = ClaudeAgent::new("claude");
        let text = agent.transcribe(b"Problem 1. Compute 2+2.").await.unwrap();
        assert_eq!(text, "Problem 1. Compute 2+2.");
    }

    #[tokio::test]
    async fn test_transcribe_rejects_binary() {
        let agent = ClaudeAgent::new("claude");
        assert!(agent.transcribe(&[0xff, 0xfe, 0x00]).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_runs_subprocess_and_trims_output() {
        // Stand-in agent that echoes a fixed reply.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\necho '  the solution  '\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let agent = ClaudeAgent::new(script.to_str().unwrap());
        let reply = agent.prompt("anything").await.unwrap();
        assert_eq!(reply, "the solution");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_surfaces_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\necho 'quota exceeded' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let agent = ClaudeAgent::new(script.to_str().unwrap());
        let err = agent.prompt("anything").await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
