//! Interactive run controller.
//!
//! Turns UI commands into selection actions and runs, and emits events for the
//! presentation layer. Runs are driven from the same loop that reads commands, so new
//! commands keep being handled while a tool is active. Quit waits for in-flight runs.

use super::coordinator::{RunCoordinator, RunError, StartedRun};
use crate::model::{InputKind, LogEntry, LogLevel, Operation, RunOutcome};
use crate::text_summary;
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Commands emitted by UI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiCommand {
    SelectInput {
        operation: Operation,
        path: String,
        kind: InputKind,
    },
    /// `None` accepts the default name proposed for the workflow.
    SelectOutput {
        operation: Operation,
        path: Option<String>,
    },
    Run(Operation),
    Status,
    Clear,
    Help,
    Quit,
}

/// Events consumed by presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiEvent {
    Log(LogEntry),
    Status {
        operation: Operation,
        text: &'static str,
        details: String,
        can_run: bool,
    },
    Cleared,
    Help,
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn send_log(ui_tx: &UnboundedSender<UiEvent>, entry: LogEntry) {
    let _ = ui_tx.send(UiEvent::Log(entry));
}

fn emit_status(coordinator: &RunCoordinator, operation: Operation, ui_tx: &UnboundedSender<UiEvent>) {
    let state = coordinator.snapshot(operation);
    let (text, details) = state.status();
    let _ = ui_tx.send(UiEvent::Status {
        operation,
        text,
        details,
        can_run: state.can_run(),
    });
}

/// Drive one claimed run, relaying its log lines to the UI as they arrive.
///
/// The relay finishes before the outcome is returned, so the summary always follows
/// the tool's own output.
async fn drive_run(
    started: StartedRun<'_>,
    ui_tx: UnboundedSender<UiEvent>,
) -> (Operation, Result<RunOutcome, RunError>) {
    let operation = started.request().operation;
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogEntry>();
    let relay = async {
        while let Some(entry) = log_rx.recv().await {
            send_log(&ui_tx, entry);
        }
    };
    let (result, ()) = tokio::join!(started.run(log_tx), relay);
    (operation, result.map_err(RunError::from))
}

/// Handle everything except `Run` and `Quit`, which touch the in-flight set.
fn apply_selection(coordinator: &RunCoordinator, cmd: UiCommand, ui_tx: &UnboundedSender<UiEvent>) {
    match cmd {
        UiCommand::SelectInput {
            operation,
            path,
            kind,
        } => {
            let what = match kind {
                InputKind::File => "file",
                InputKind::Folder => "folder",
            };
            send_log(
                ui_tx,
                LogEntry::info(format!("Selected input {what}: {}", file_name(&path))),
            );
            let suggested = coordinator.update(operation, |s| {
                s.select_input(path, kind).map(str::to_string)
            });
            if let Some(output) = suggested {
                send_log(ui_tx, LogEntry::info(format!("Suggested output: {output}")));
            }
            emit_status(coordinator, operation, ui_tx);
        }
        UiCommand::SelectOutput { operation, path } => {
            let path = coordinator.update(operation, |s| {
                let path = path.unwrap_or_else(|| s.default_output_name());
                s.select_output(path.clone());
                path
            });
            send_log(
                ui_tx,
                LogEntry::info(format!("Set output location: {}", file_name(&path))),
            );
            emit_status(coordinator, operation, ui_tx);
        }
        UiCommand::Status => {
            for operation in Operation::ALL {
                emit_status(coordinator, operation, ui_tx);
            }
        }
        UiCommand::Clear => {
            let _ = ui_tx.send(UiEvent::Cleared);
            send_log(ui_tx, LogEntry::info("Log cleared."));
        }
        UiCommand::Help => {
            let _ = ui_tx.send(UiEvent::Help);
        }
        UiCommand::Run(_) | UiCommand::Quit => {}
    }
}

/// Orchestrate runs from UI commands and emit events back to the presentation layer.
pub(crate) async fn run_controller(
    coordinator: &RunCoordinator,
    ui_tx: UnboundedSender<UiEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut runs = FuturesUnordered::new();
    let mut quit_pending = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Run(operation)) => match coordinator.begin(operation) {
                        Ok(started) => {
                            for line in text_summary::start_banner(started.request()) {
                                send_log(&ui_tx, line);
                            }
                            runs.push(drive_run(started, ui_tx.clone()));
                            emit_status(coordinator, operation, &ui_tx);
                        }
                        Err(e) => {
                            debug!(%operation, error = %e, "run rejected");
                            send_log(&ui_tx, LogEntry::new(LogLevel::Warning, format!("Cannot start: {e}")));
                        }
                    },
                    // Quit (or a closed command channel) waits for in-flight runs to settle.
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if runs.is_empty() {
                            break;
                        }
                        send_log(&ui_tx, LogEntry::info(format!(
                            "Waiting for {} run(s) to finish…",
                            runs.len()
                        )));
                    }
                    Some(other) => apply_selection(coordinator, other, &ui_tx),
                }
            }
            Some((operation, result)) = runs.next(), if !runs.is_empty() => {
                for line in text_summary::build_summary(operation, &result) {
                    send_log(&ui_tx, line);
                }
                emit_status(coordinator, operation, &ui_tx);
                if quit_pending && runs.is_empty() {
                    break;
                }
            }
            else => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{reduce, SessionError, ToolLauncher};
    use crate::model::{ResultPayload, RunRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowLauncher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolLauncher for SlowLauncher {
        async fn launch(
            &self,
            request: &RunRequest,
            event_tx: UnboundedSender<LogEntry>,
        ) -> Result<RunOutcome, SessionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entry = LogEntry::info("tool says hi");
            let _ = event_tx.send(entry.clone());
            tokio::time::sleep(Duration::from_millis(100)).await;
            let payload = ResultPayload {
                success: true,
                output: Some(request.output.clone()),
                ..Default::default()
            };
            Ok(reduce(0, Some(payload), vec![entry]))
        }
    }

    fn drain(rx: &mut UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn messages(events: &[UiEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::Log(l) => Some(l.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn quit_waits_for_run_and_rejects_overlap() {
        let launcher = Arc::new(SlowLauncher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = RunCoordinator::new(launcher.clone());
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        cmd_tx
            .send(UiCommand::SelectInput {
                operation: Operation::Decompile,
                path: "/data/shop.ido".into(),
                kind: InputKind::File,
            })
            .unwrap();
        cmd_tx.send(UiCommand::Run(Operation::Decompile)).unwrap();
        cmd_tx.send(UiCommand::Run(Operation::Decompile)).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();

        run_controller(&coordinator, ui_tx, cmd_rx).await.unwrap();

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        let events = drain(&mut ui_rx);
        let msgs = messages(&events);
        assert!(msgs.contains(&"Suggested output: /data/shop.xml".to_string()));
        assert!(msgs.iter().any(|m| m.starts_with("Cannot start:")));

        let hi = msgs.iter().position(|m| m == "tool says hi").unwrap();
        let done = msgs
            .iter()
            .position(|m| m == "✓ Decompilation completed successfully!")
            .unwrap();
        assert!(hi < done);

        let last_status = events
            .iter()
            .rev()
            .find_map(|e| match e {
                UiEvent::Status { text, can_run, .. } => Some((*text, *can_run)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_status, ("Complete", true));
        assert!(!coordinator.snapshot(Operation::Decompile).is_busy());
    }

    #[tokio::test]
    async fn run_without_selection_is_a_no_op() {
        let launcher = Arc::new(SlowLauncher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = RunCoordinator::new(launcher.clone());
        let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Run(Operation::Compile)).unwrap();
        cmd_tx
            .send(UiCommand::SelectOutput {
                operation: Operation::Compile,
                path: None,
            })
            .unwrap();
        cmd_tx.send(UiCommand::Clear).unwrap();
        drop(cmd_tx);

        run_controller(&coordinator, ui_tx, cmd_rx).await.unwrap();

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
        let events = drain(&mut ui_rx);
        assert!(events.contains(&UiEvent::Cleared));
        let msgs = messages(&events);
        assert!(msgs.contains(&"Set output location: output.ido".to_string()));
        assert_eq!(msgs.last().map(String::as_str), Some("Log cleared."));
        assert_eq!(
            coordinator.snapshot(Operation::Compile).output(),
            Some("output.ido")
        );
    }
}
