use anyhow::{Context, Result};
use archflow::config::AppConfig;
use archflow::llm::CommandLlmClient;
use archflow::mcp::McpDiagramRenderer;
use archflow::paths::StorageLayout;
use archflow::phases::PhaseRunner;
use archflow::session::{Progress, RunReport, SessionError, SessionManager};
use archflow::session_store::FileSessionStore;
use archflow::state::Step;
use archflow::state_machine::{StateSnapshot, StepOutput};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the diagnostic log filter.
const LOG_ENV_VAR: &str = "ARCHFLOW_LOG";

#[derive(Parser)]
#[command(name = "archflow")]
#[command(about = "Resilient orchestration of AI-assisted architecture assessments")]
#[command(version = archflow::VERSION)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Path to a YAML configuration file (defaults to ~/.archflow/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session from a description of the current architecture
    Start {
        /// Architecture description (all arguments are joined)
        #[arg(trailing_var_arg = true, required = true)]
        description: Vec<String>,
    },
    /// Run steps until the workflow finishes, needs an answer, or fails
    Run {
        session_id: String,
        /// Stop after this step completes
        #[arg(long)]
        until: Option<String>,
    },
    /// Answer the pending clarifying question
    Answer {
        session_id: String,
        /// The answer (all arguments are joined)
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
        /// End the clarification dialogue instead of answering
        #[arg(long)]
        done: bool,
    },
    /// Skip the current step (diagram generation or export only)
    Skip { session_id: String },
    /// Show where a session stands
    Status { session_id: String },
    /// List persisted sessions, newest first
    List,
    /// List the diagrams produced by the session's diagram step
    Diagrams { session_id: String },
    /// Export the report (falls back to JSON when the report cannot be built)
    Export {
        session_id: String,
        /// Destination file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Export the structured session data as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard all progress and restart the session from intake
    Reset { session_id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_manager(config: &AppConfig, layout: StorageLayout) -> Result<SessionManager> {
    let store = Arc::new(FileSessionStore::new(layout.clone()));
    let runner = PhaseRunner::from_config(
        config,
        Arc::new(CommandLlmClient::new(config.llm.clone())),
        Arc::new(McpDiagramRenderer::new(config.diagrams.clone())),
        layout.clone(),
    )?;
    let limits = config.step_limits()?;
    Ok(SessionManager::new(layout, store, Arc::new(runner), limits))
}

/// Turns a session error into a CLI error that names the suggested action.
fn explain(err: SessionError) -> anyhow::Error {
    let classification = err.classification();
    anyhow::anyhow!(
        "{}\n  {} (suggested action: {})",
        err,
        classification.user_message,
        classification.suggested_action
    )
}

fn print_output(output: &StepOutput) {
    match &output.warning {
        Some(warning) => {
            println!("[{}] degraded: {}", output.step, warning);
            println!(
                "  {} (suggested action: {})",
                warning.classification.user_message, warning.classification.suggested_action
            );
        }
        None if output.output.is_empty() => println!("[{}] skipped", output.step),
        None => {
            let preview: String = output.output.chars().take(200).collect();
            println!("[{}] done", output.step);
            println!("  {}", preview.replace('\n', "\n  "));
        }
    }
}

fn print_snapshot(snapshot: &StateSnapshot) {
    println!("Session:   {}", snapshot.session_id);
    if snapshot.finished {
        println!("Status:    complete");
    } else {
        println!("Current:   {}", snapshot.current_step);
    }
    for step in Step::ALL {
        let mark = if snapshot.failed_steps.contains(&step) {
            "!"
        } else if snapshot.completed_steps.contains(&step) {
            "x"
        } else {
            " "
        };
        println!("  [{}] {}", mark, step);
    }
    if let Some(question) = &snapshot.pending_question {
        println!("Waiting for an answer: {}", question);
    }
}

fn print_run(session_id: &str, report: &RunReport) {
    for output in &report.outputs {
        print_output(output);
    }
    if let Some(question) = &report.awaiting_answer {
        println!("\nQuestion: {}", question);
        println!("Answer with: archflow answer {} <text>", session_id);
    }
    if report.finished {
        println!("\nWorkflow complete.");
    }
}

async fn run_session(
    manager: Arc<SessionManager>,
    session_id: String,
    until: Option<Step>,
) -> Result<()> {
    manager.open(&session_id).map_err(explain)?;
    let task = {
        let manager = manager.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move { manager.run(&session_id, until).await })
    };
    let report = task
        .await
        .context("Session task stopped unexpectedly")?
        .map_err(explain)?;
    print_run(&session_id, &report);
    match report.failure {
        Some(err) => Err(explain(SessionError::Step(err))),
        None => Ok(()),
    }
}

async fn export(
    manager: &SessionManager,
    layout: &StorageLayout,
    session_id: &str,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let (bytes, extension) = if json {
        let bytes = manager
            .export_structured_data(session_id)
            .await
            .map_err(explain)?;
        (bytes, "json")
    } else {
        match manager.export_report(session_id).await {
            Ok(report) => (report.bytes, report.extension),
            Err(err) => {
                eprintln!("warning: report export failed: {}", err);
                eprintln!("warning: exporting structured data as JSON instead");
                let bytes = manager
                    .export_structured_data(session_id)
                    .await
                    .map_err(explain)?;
                (bytes, "json")
            }
        }
    };

    let path = match out {
        Some(path) => path,
        None => StorageLayout::ensure(layout.exports_dir())?
            .join(format!("{}.{}", session_id, extension)),
    };
    std::fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write export: {}", path.display()))?;
    println!("Exported to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let layout = StorageLayout::from_home()?;
    let config = AppConfig::load(cli.config.as_deref(), &layout)?;
    let manager = Arc::new(build_manager(&config, layout.clone())?);

    match cli.command {
        Command::Start { description } => {
            let description = description.join(" ");
            let session_id = manager.create(&description).map_err(explain)?;
            println!("Started session {}", session_id);
            println!("Continue with: archflow run {}", session_id);
        }
        Command::Run { session_id, until } => {
            let until = match until {
                Some(name) => Some(
                    Step::parse(&name).with_context(|| format!("Unknown step '{}'", name))?,
                ),
                None => None,
            };
            run_session(manager, session_id, until).await?;
        }
        Command::Answer {
            session_id,
            text,
            done,
        } => {
            if done {
                manager.close_dialogue(&session_id).await.map_err(explain)?;
                println!("Clarification closed. Continue with: archflow run {}", session_id);
            } else {
                let answer = text.join(" ");
                if answer.trim().is_empty() {
                    anyhow::bail!("Provide an answer, or pass --done to end the clarification");
                }
                manager.answer(&session_id, &answer).await.map_err(explain)?;
                match manager.advance(&session_id).await.map_err(explain)? {
                    Progress::AwaitingAnswer { question } => println!("Question: {}", question),
                    Progress::Advanced(output) => print_output(&output),
                }
            }
        }
        Command::Skip { session_id } => {
            let output = manager.skip(&session_id).await.map_err(explain)?;
            print_output(&output);
        }
        Command::Status { session_id } => {
            let snapshot = manager.snapshot(&session_id).await.map_err(explain)?;
            print_snapshot(&snapshot);
        }
        Command::List => {
            let sessions = manager.list().map_err(explain)?;
            if sessions.is_empty() {
                println!("No sessions found.");
            }
            for summary in sessions {
                let failed = if summary.failed_steps.is_empty() {
                    String::new()
                } else {
                    format!(" ({} with errors)", summary.failed_steps.len())
                };
                println!(
                    "{}  {:<20} {}/{} steps{}  saved {}",
                    summary.session_id,
                    summary.current_step.to_string(),
                    summary.completed_count,
                    Step::ALL.len(),
                    failed,
                    summary.saved_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Diagrams { session_id } => {
            let files = manager
                .get_diagram_files(&session_id)
                .await
                .map_err(explain)?;
            if files.is_empty() {
                println!("No diagrams generated.");
            }
            for file in files {
                println!("{}", file.display());
            }
        }
        Command::Export {
            session_id,
            out,
            json,
        } => export(&manager, &layout, &session_id, out, json).await?,
        Command::Reset { session_id } => {
            let opened = manager.discard(&session_id).await.map_err(explain)?;
            println!("Session {} reset to {}", session_id, opened.snapshot.current_step);
        }
    }
    Ok(())
}
