use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use solvent::agents::{ClaudeAgent, TexValidator};
use solvent::config::Config;
use solvent::graph::GraphBuilder;
use solvent::ledger::{JobLedger, JobStatus};
use solvent::pipeline::PipelineController;
use solvent::problem::{Problem, flatten};
use solvent::solver::DocumentValidator;
use solvent::ui::SolveUi;

#[derive(Parser)]
#[command(name = "solvent")]
#[command(version, about = "AI-powered problem set solver")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve a problem set document end to end
    Solve {
        /// Input document (plain text)
        input: PathBuf,

        /// Where to write the synthesized document (default: <input>.solved.md)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Max solver tasks in flight per level
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Solve/validate attempts per problem
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Per-problem solve/validate cycle timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Suppress the progress display
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the dependency levels for a pre-chunked problem list
    Graph {
        /// JSON file holding an array of problems
        problems: PathBuf,
    },
    /// Run a document through the validator once
    Check {
        /// Document to compile
        document: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "solvent=debug" } else { "solvent=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Solve {
            input,
            output,
            max_parallel,
            max_attempts,
            timeout,
            quiet,
        } => solve(input, output, max_parallel, max_attempts, timeout, quiet).await,
        Commands::Graph { problems } => graph(problems),
        Commands::Check { document } => check(document).await,
    }
}

async fn solve(
    input: PathBuf,
    output: Option<PathBuf>,
    max_parallel: Option<usize>,
    max_attempts: Option<u32>,
    timeout: Option<u64>,
    quiet: bool,
) -> Result<()> {
    let mut config = Config::load(&std::env::current_dir()?)?;
    if let Some(max) = max_parallel {
        config = config.with_max_concurrent_solvers(max);
    }
    if let Some(attempts) = max_attempts {
        config = config.with_max_compile_attempts(attempts);
    }
    if let Some(secs) = timeout {
        config = config.with_solver_timeout(Duration::from_secs(secs));
    }

    let bytes = std::fs::read(&input)
        .with_context(|| format!("Failed to read input {}", input.display()))?;

    let ledger = Arc::new(JobLedger::new());
    let agent = Arc::new(ClaudeAgent::new(&config.claude_cmd));
    let validator = Arc::new(TexValidator::new(&config.tex_cmd, config.compile_timeout));
    let controller = Arc::new(PipelineController::new(
        Arc::clone(&ledger),
        agent.clone(),
        agent,
        validator,
        config,
    ));

    let job_id = controller.create_job(Some(bytes))?;

    // Progress display, fed from the event channel.
    let ui_task = (!quiet).then(|| {
        let mut rx = ledger.subscribe();
        tokio::spawn(async move {
            let mut ui = SolveUi::new();
            while let Ok(event) = rx.recv().await {
                ui.handle_event(&event);
            }
        })
    });

    // Ctrl-C requests cooperative cancellation; the current level's
    // in-flight calls finish and are discarded.
    {
        let controller = Arc::clone(&controller);
        let job_id = job_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = controller.cancel_job(&job_id);
            }
        });
    }

    let view = controller.run(&job_id).await?;
    if let Some(task) = ui_task {
        task.abort();
    }

    match view.status {
        JobStatus::Completed => {
            let job = ledger.job(&job_id)?;
            let out_path = output.unwrap_or_else(|| {
                let mut path = input.clone();
                path.set_extension("solved.md");
                path
            });
            if let Some(document) = &job.artifacts.document {
                std::fs::write(&out_path, document)
                    .with_context(|| format!("Failed to write {}", out_path.display()))?;
                println!(
                    "{} wrote {}",
                    style("Done:").green().bold(),
                    out_path.display()
                );
            }
            if let Some(artifact) = &job.artifacts.artifact {
                let pdf_path = out_path.with_extension("pdf");
                std::fs::write(&pdf_path, artifact)
                    .with_context(|| format!("Failed to write {}", pdf_path.display()))?;
                println!("      compiled {}", pdf_path.display());
            }
            let counts = job.solver_counts();
            if counts.failed > 0 || counts.waiting > 0 {
                println!(
                    "{} {} of {} problems unsolved",
                    style("Note:").yellow().bold(),
                    counts.failed + counts.waiting,
                    counts.total()
                );
            }
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("{}", style("Cancelled").yellow().bold());
            std::process::exit(130);
        }
        _ => {
            eprintln!(
                "{} {}",
                style("Failed:").red().bold(),
                view.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}

fn graph(problems_path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&problems_path)
        .with_context(|| format!("Failed to read {}", problems_path.display()))?;
    let problems: Vec<Problem> =
        serde_json::from_str(&raw).context("Failed to parse problem JSON")?;

    let graph = GraphBuilder::new(flatten(&problems)).build();

    println!(
        "{} problems in {} levels",
        graph.len(),
        graph.levels.len()
    );
    for (i, level) in graph.levels.iter().enumerate() {
        println!("  Level {}: {}", i, level.join(", "));
    }
    if graph.has_cycles() {
        println!(
            "{} cycle among: {}",
            style("Warning:").yellow().bold(),
            graph.cyclic.join(", ")
        );
    }
    Ok(())
}

async fn check(document_path: PathBuf) -> Result<()> {
    let document = std::fs::read_to_string(&document_path)
        .with_context(|| format!("Failed to read {}", document_path.display()))?;

    let config = Config::load(&std::env::current_dir()?)?;
    let validator = TexValidator::new(&config.tex_cmd, config.compile_timeout);
    let outcome = validator.validate(&document).await?;

    if outcome.success {
        println!("{} document compiles", style("OK:").green().bold());
        Ok(())
    } else {
        eprintln!(
            "{}\n{}",
            style("Compilation failed:").red().bold(),
            outcome.error_log.as_deref().unwrap_or("no error log")
        );
        std::process::exit(1);
    }
}
