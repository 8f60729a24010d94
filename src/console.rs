//! Line-oriented console front end.
//!
//! Reads commands from stdin, hands them to the run controller and prints the events
//! it emits. Log lines are stamped with wall-clock time when they are displayed.

use crate::model::{InputKind, LogEntry, Operation};
use crate::orchestrator::{self, RunCoordinator, UiCommand, UiEvent};
use anyhow::Result;
use std::io::{IsTerminal, Write};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const HELP: &[&str] = &[
    "Commands:",
    "  decompile input <file.ido>     select the IDO file to decompile",
    "  decompile output [file.xml]    set the XML destination (default name if omitted)",
    "  decompile run                  start decompiling",
    "  compile input <file>           select an XML or image source (xml, dds, tga, bmp, png)",
    "  compile folder <dir>           select a folder of sources",
    "  compile output [file.ido]      set the IDO destination (default name if omitted)",
    "  compile run                    start compiling",
    "  status                         show both workflows",
    "  clear                          clear the log",
    "  help                           show this help",
    "  quit                           exit once running jobs finish",
];

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn timestamp(now: OffsetDateTime) -> String {
    let fmt = time::macros::format_description!("[hour]:[minute]:[second]");
    now.format(&fmt).unwrap_or_else(|_| "--:--:--".into())
}

/// Render one log entry as `[HH:MM:SS] LEVEL   message`.
pub(crate) fn format_log_line(entry: &LogEntry, now: OffsetDateTime) -> String {
    format!(
        "[{}] {:<7} {}",
        timestamp(now),
        entry.level.as_str(),
        entry.message
    )
}

fn format_event(event: &UiEvent, now: OffsetDateTime) -> Vec<String> {
    match event {
        UiEvent::Log(entry) => vec![format_log_line(entry, now)],
        UiEvent::Status {
            operation,
            text,
            details,
            can_run,
        } => {
            let mut line = format!("[{}] {operation}: {text}", timestamp(now));
            if !details.is_empty() {
                line.push_str(&format!(" ({details})"));
            }
            line.push_str(if *can_run { " [ready]" } else { " [not ready]" });
            vec![line]
        }
        UiEvent::Cleared => Vec::new(),
        UiEvent::Help => HELP.iter().map(|s| s.to_string()).collect(),
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub(crate) fn parse_command(line: &str) -> Result<Option<UiCommand>, String> {
    let (head, rest) = split_word(line);
    let cmd = match head.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "quit" | "exit" | "q" => UiCommand::Quit,
        "status" => UiCommand::Status,
        "clear" => UiCommand::Clear,
        "help" | "?" => UiCommand::Help,
        other => {
            let operation =
                Operation::parse(other).ok_or_else(|| format!("Unknown command: {other}"))?;
            let (action, arg) = split_word(rest);
            let path = unquote(arg);
            match action.to_ascii_lowercase().as_str() {
                "input" | "folder" if path.is_empty() => {
                    return Err(format!("{operation} {action} needs a path"));
                }
                "input" => UiCommand::SelectInput {
                    operation,
                    path: path.to_string(),
                    kind: InputKind::File,
                },
                "folder" if operation == Operation::Compile => UiCommand::SelectInput {
                    operation,
                    path: path.to_string(),
                    kind: InputKind::Folder,
                },
                "folder" => return Err("Only compile accepts a folder input".into()),
                "output" => UiCommand::SelectOutput {
                    operation,
                    path: (!path.is_empty()).then(|| path.to_string()),
                },
                "run" => UiCommand::Run(operation),
                "" => return Err(format!("{operation} needs an action: input, output or run")),
                unknown => return Err(format!("Unknown {operation} action: {unknown}")),
            }
        }
    };
    Ok(Some(cmd))
}

/// Forward stdin lines as commands until EOF or quit.
async fn read_commands(cmd_tx: UnboundedSender<UiCommand>, ui_tx: UnboundedSender<UiEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                let quit = cmd == UiCommand::Quit;
                if cmd_tx.send(cmd).is_err() || quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(msg) => {
                let _ = ui_tx.send(UiEvent::Log(LogEntry::new(
                    crate::model::LogLevel::Warning,
                    format!("{msg} (type 'help')"),
                )));
            }
        }
    }
}

/// Print UI events on a blocking thread so terminal writes never stall the runtime.
fn spawn_printer(mut ui_rx: UnboundedReceiver<UiEvent>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let is_tty = stdout.is_terminal();
        let mut out = std::io::LineWriter::new(stdout.lock());
        while let Some(event) = ui_rx.blocking_recv() {
            if event == UiEvent::Cleared && is_tty {
                let _ = write!(out, "\x1b[2J\x1b[1;1H");
            }
            for line in format_event(&event, local_now()) {
                let _ = writeln!(out, "{line}");
            }
        }
        let _ = out.flush();
    })
}

pub(crate) async fn run(coordinator: RunCoordinator) -> Result<()> {
    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let printer = spawn_printer(ui_rx);
    let _ = ui_tx.send(UiEvent::Log(LogEntry::info(
        "IDO shell ready. Type 'help' for commands.",
    )));
    let reader = tokio::spawn(read_commands(cmd_tx, ui_tx.clone()));

    let res = orchestrator::run_controller(&coordinator, ui_tx, cmd_rx).await;

    // The reader may still be parked on stdin; stop it so the printer sees the channel close.
    reader.abort();
    let _ = reader.await;
    let _ = printer.await;
    res
}
