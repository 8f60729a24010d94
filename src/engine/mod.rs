mod decoder;
mod outcome;

pub use decoder::{Channel, DecodedEvent, LineDecoder};
pub use outcome::{reduce, UNKNOWN_EXIT_CODE};

use crate::model::{LogEntry, ResultPayload, RunOutcome, RunRequest, ToolCommand, ToolConfig};
use async_trait::async_trait;
use bytes::BytesMut;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

const READ_CHUNK: usize = 8 * 1024;

/// The tool could not be run to completion. Distinct from a tool that ran and failed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start {program}: {message}")]
    Spawn {
        program: String,
        message: String,
        logs: Vec<LogEntry>,
    },
    #[error("failed to collect exit status of {program}: {message}")]
    Wait {
        program: String,
        message: String,
        logs: Vec<LogEntry>,
    },
}

impl SessionError {
    /// Underlying OS error text.
    pub fn message(&self) -> &str {
        match self {
            SessionError::Spawn { message, .. } | SessionError::Wait { message, .. } => message,
        }
    }

    /// Whatever was captured before the failure (usually nothing).
    pub fn logs(&self) -> &[LogEntry] {
        match self {
            SessionError::Spawn { logs, .. } | SessionError::Wait { logs, .. } => logs,
        }
    }
}

/// Starts the external tool for a request. Seam between the coordinator and real processes.
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    async fn launch(
        &self,
        request: &RunRequest,
        event_tx: UnboundedSender<LogEntry>,
    ) -> Result<RunOutcome, SessionError>;
}

/// Launches the configured tool as a child process.
pub struct ProcessLauncher {
    cfg: ToolConfig,
}

impl ProcessLauncher {
    pub fn new(cfg: ToolConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl ToolLauncher for ProcessLauncher {
    async fn launch(
        &self,
        request: &RunRequest,
        event_tx: UnboundedSender<LogEntry>,
    ) -> Result<RunOutcome, SessionError> {
        ProcessSession::new(self.cfg.command_for(request))
            .run(event_tx)
            .await
    }
}

/// Accumulates decoded events and mirrors log entries to the live subscriber.
struct Collector {
    logs: Vec<LogEntry>,
    result: Option<ResultPayload>,
    event_tx: UnboundedSender<LogEntry>,
}

impl Collector {
    fn new(event_tx: UnboundedSender<LogEntry>) -> Self {
        Self {
            logs: Vec::new(),
            result: None,
            event_tx,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        // A subscriber that went away must not stop the run.
        let _ = self.event_tx.send(entry.clone());
        self.logs.push(entry);
    }

    fn apply(&mut self, event: DecodedEvent) {
        match event {
            DecodedEvent::Log(entry) => self.push(entry),
            DecodedEvent::Result { payload, raw } => {
                if self.result.is_none() {
                    debug!(success = payload.success, "result line received");
                    self.result = Some(payload);
                } else {
                    warn!("ignoring additional result line");
                    self.push(LogEntry::info(raw));
                }
            }
            DecodedEvent::Unparsable { raw } => {
                warn!(line = %raw, "malformed result line, keeping it as a log entry");
                self.push(LogEntry::info(raw));
            }
        }
    }
}

/// One invocation of the external tool.
pub struct ProcessSession {
    command: ToolCommand,
}

impl ProcessSession {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    /// Spawn the tool, stream its output through the decoder and reduce the exit.
    ///
    /// Both pipes are drained from a single loop so entries land in arrival order.
    #[instrument(skip_all, fields(program = %self.command.program.display()))]
    pub async fn run(self, event_tx: UnboundedSender<LogEntry>) -> Result<RunOutcome, SessionError> {
        let program = self.command.program.display().to_string();
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SessionError::Spawn {
            program: program.clone(),
            message: e.to_string(),
            logs: Vec::new(),
        })?;
        info!(pid = ?child.id(), "tool started");

        let mut collector = Collector::new(event_tx);
        let mut decoder = LineDecoder::new();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut err_buf = BytesMut::with_capacity(READ_CHUNK);

        while stdout.is_some() || stderr.is_some() {
            let (channel, read) = tokio::select! {
                r = read_chunk(&mut stdout, &mut out_buf) => (Channel::Stdout, r),
                r = read_chunk(&mut stderr, &mut err_buf) => (Channel::Stderr, r),
            };
            let buf = match channel {
                Channel::Stdout => &mut out_buf,
                Channel::Stderr => &mut err_buf,
            };

            let events = match read {
                Ok(0) | Err(_) => {
                    if let Err(e) = &read {
                        warn!(?channel, error = %e, "read failed, closing pipe");
                    }
                    match channel {
                        Channel::Stdout => stdout = None,
                        Channel::Stderr => stderr = None,
                    }
                    decoder.finish(channel)
                }
                Ok(_) => {
                    let chunk = buf.split();
                    decoder.feed(channel, &chunk)
                }
            };
            for event in events {
                collector.apply(event);
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(SessionError::Wait {
                    program,
                    message: e.to_string(),
                    logs: collector.logs,
                })
            }
        };
        let exit_code = status.code().unwrap_or(UNKNOWN_EXIT_CODE);
        info!(exit_code, lines = collector.logs.len(), "tool exited");

        Ok(reduce(exit_code, collector.result, collector.logs))
    }
}

/// Read the next chunk from a pipe; a closed pipe never resolves.
async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut BytesMut) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(reader) => {
            buf.reserve(READ_CHUNK);
            reader.read_buf(buf).await
        }
        None => futures::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::outcome::MISSING_RESULT;
    use super::*;
    use crate::model::{LogLevel, Operation};
    use std::ffi::OsString;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand {
            program: PathBuf::from("sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
            working_dir: None,
        }
    }

    async fn run_script(script: &str) -> Result<RunOutcome, SessionError> {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProcessSession::new(sh(script)).run(tx).await
    }

    #[tokio::test]
    async fn reports_parsed_result_and_logs() {
        let outcome = run_script(
            r#"echo '{"level":"INFO","message":"parsing"}'
echo 'RESULT:{"success":true,"output":"out.xml","meta":"out.meta"}'"#,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output(), Some("out.xml"));
        assert_eq!(
            outcome.payload.as_ref().and_then(|p| p.meta.as_deref()),
            Some("out.meta")
        );
        assert_eq!(outcome.logs, vec![LogEntry::info("parsing")]);
    }

    #[tokio::test]
    async fn clean_exit_without_result_is_failure() {
        let outcome = run_script("echo working").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error(), Some(MISSING_RESULT));
        assert_eq!(outcome.logs, vec![LogEntry::info("working")]);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_diagnostics() {
        let outcome = run_script("echo started; echo 'Traceback: boom' >&2; exit 7")
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 7);
        assert!(outcome.error().unwrap().contains('7'));
        assert_eq!(
            outcome.logs,
            vec![LogEntry::info("started"), LogEntry::error("Traceback: boom")]
        );
    }

    #[tokio::test]
    async fn interleaves_channels_in_arrival_order() {
        let outcome = run_script(
            r#"echo '{"level":"INFO","message":"one"}'
sleep 0.2
echo two >&2
sleep 0.2
echo '{"level":"SUCCESS","message":"three"}'
echo 'RESULT:{"success":true}'"#,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        let levels: Vec<_> = outcome.logs.iter().map(|l| l.level.clone()).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Error, LogLevel::Success]);
        let messages: Vec<_> = outcome.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn first_result_wins() {
        let outcome = run_script(
            r#"echo 'RESULT:{"success":true,"output":"first"}'
echo 'RESULT:{"success":false,"error":"second"}'"#,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output(), Some("first"));
        assert_eq!(outcome.logs.len(), 1);
        assert!(outcome.logs[0].message.contains("second"));
    }

    #[tokio::test]
    async fn malformed_result_is_tolerated() {
        let outcome = run_script("echo 'RESULT:{not json'").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error(), Some(MISSING_RESULT));
        assert_eq!(outcome.logs, vec![LogEntry::info("RESULT:{not json")]);
    }

    #[tokio::test]
    async fn semantic_failure_passes_through() {
        let outcome =
            run_script(r#"echo 'RESULT:{"success":false,"error":"Zlib decompression failed"}'"#)
                .await
                .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.error(), Some("Zlib decompression failed"));
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let outcome = run_script(r#"printf 'RESULT:{"success":true,"size":12}'"#)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.payload.and_then(|p| p.size), Some(12));
    }

    #[tokio::test]
    async fn live_subscriber_sees_every_entry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = ProcessSession::new(sh(
            "echo a; echo b >&2; echo 'RESULT:{\"success\":true}'",
        ))
        .run(tx)
        .await
        .unwrap();
        let mut live = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            live.push(entry);
        }
        assert_eq!(live, outcome.logs);
        assert_eq!(live.len(), 2);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_stop_the_run() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let outcome = ProcessSession::new(sh("echo a; echo 'RESULT:{\"success\":true}'"))
            .run(tx)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.logs.len(), 1);
    }

    #[tokio::test]
    async fn heavy_output_does_not_stall() {
        let outcome = run_script(
            r#"i=0
while [ $i -lt 5000 ]; do
  echo '{"level":"INFO","message":"padding padding padding padding padding"}'
  echo 'stderr padding padding padding padding padding' >&2
  i=$((i+1))
done
echo 'RESULT:{"success":true}'"#,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.logs.len(), 10_000);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = ProcessSession::new(ToolCommand {
            program: PathBuf::from("/nonexistent/ido-tool-binary"),
            args: Vec::new(),
            working_dir: None,
        })
        .run(tx)
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert!(err.logs().is_empty());
        assert!(!err.message().is_empty());
    }

    #[tokio::test]
    async fn launcher_passes_operation_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(
            &script,
            "printf 'RESULT:{\"success\":true,\"output\":\"%s|%s|%s\"}\\n' \"$1\" \"$2\" \"$3\"\n",
        )
        .unwrap();
        let launcher = ProcessLauncher::new(ToolConfig {
            program: PathBuf::from("sh"),
            script: Some(script),
            working_dir: Some(dir.path().to_path_buf()),
        });
        let request = RunRequest {
            operation: Operation::Decompile,
            input: "in.ido".into(),
            output: "out.xml".into(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = launcher.launch(&request, tx).await.unwrap();
        assert_eq!(outcome.output(), Some("decompile|in.ido|out.xml"));
    }
}
