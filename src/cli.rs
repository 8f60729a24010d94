use crate::console::format_log_line;
use crate::engine::ProcessLauncher;
use crate::model::{InputKind, LogEntry, Operation, RunRequest, ToolConfig};
use crate::orchestrator::{RunCoordinator, RunError};
use crate::text_summary;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "ido-shell",
    version,
    about = "Convert IDO files to and from XML through an external conversion tool"
)]
pub struct Cli {
    /// Program used to run the conversion tool
    #[arg(long, env = "IDO_SHELL_TOOL", default_value = "python", global = true)]
    pub tool: PathBuf,

    /// Script passed to the tool program before the operation
    #[arg(long, env = "IDO_SHELL_SCRIPT", default_value = "ido_tool.py", global = true)]
    pub script: PathBuf,

    /// Invoke the tool directly as `<tool> <operation> <input> <output>`
    #[arg(long, global = true)]
    pub no_script: bool,

    /// Working directory for the tool process
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Print the JSON result object and exit (no live log)
    #[arg(long, global = true)]
    pub json: bool,

    /// Run silently: suppress all output except errors
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Decompile an IDO file to XML
    Decompile(RunArgs),
    /// Compile an XML/image source (or a folder) to IDO
    Compile(RunArgs),
    /// Line-driven console for both workflows
    Interactive,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Input path, handed to the tool as-is
    pub input: String,

    /// Output path (suggested from the input when omitted)
    pub output: Option<String>,

    /// Treat the input as a folder of sources (compile only)
    #[arg(long)]
    pub folder: bool,
}

/// Build a `ToolConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ToolConfig {
    ToolConfig {
        program: args.tool.clone(),
        script: (!args.no_script).then(|| args.script.clone()),
        working_dir: args.workdir.clone(),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let coordinator = RunCoordinator::new(Arc::new(ProcessLauncher::new(build_config(&args))));
    match &args.command {
        Command::Interactive => crate::console::run(coordinator).await,
        Command::Decompile(run) => run_once(&args, &coordinator, Operation::Decompile, run).await,
        Command::Compile(run) => run_once(&args, &coordinator, Operation::Compile, run).await,
    }
}

/// Select paths on the workflow, execute once and report.
async fn run_once(
    args: &Cli,
    coordinator: &RunCoordinator,
    operation: Operation,
    run: &RunArgs,
) -> Result<()> {
    if run.folder && operation != Operation::Compile {
        anyhow::bail!("--folder only applies to compile");
    }
    let kind = if run.folder {
        InputKind::Folder
    } else {
        InputKind::File
    };
    coordinator.update(operation, |s| {
        s.select_input(run.input.clone(), kind);
        if let Some(output) = &run.output {
            s.select_output(output.clone());
        }
    });

    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    // Text mode streams the tool's log to stderr; stdout gets the summary.
    let stream_to = out_tx.as_ref().filter(|_| !args.json);

    if let Some(tx) = stream_to {
        let state = coordinator.snapshot(operation);
        if let (Some(input), Some(output)) = (state.input(), state.output()) {
            let request = RunRequest {
                operation,
                input: input.to_string(),
                output: output.to_string(),
            };
            for line in text_summary::start_banner(&request) {
                let _ = tx.send(OutputLine::Stderr(format_log_line(&line, now())));
            }
        }
    }

    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogEntry>();
    let relay = async {
        while let Some(entry) = log_rx.recv().await {
            if let Some(tx) = stream_to {
                let _ = tx.send(OutputLine::Stderr(format_log_line(&entry, now())));
            }
        }
    };
    let (result, ()) = tokio::join!(coordinator.execute(operation, log_tx), relay);

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let value = match &result {
                Ok(outcome) => serde_json::to_value(outcome.to_response())?,
                Err(RunError::Tool(e)) => serde_json::json!({
                    "success": false,
                    "error": e.message(),
                    "logs": e.logs(),
                }),
                Err(RunError::Precondition(e)) => serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "logs": [],
                }),
            };
            let _ = tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&value)?));
        } else {
            for line in text_summary::build_summary(operation, &result) {
                let _ = tx.send(OutputLine::Stdout(format_log_line(&line, now())));
            }
        }
    }

    drop(out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    let outcome = result.with_context(|| format!("{} could not run", operation.noun()))?;
    if !outcome.success {
        anyhow::bail!(
            "{} failed: {}",
            operation.noun(),
            outcome.error().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
