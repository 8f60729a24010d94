//! Run banners and result summaries for presentation layers.
//!
//! Produces log lines shown before a run starts and after it ends, in the same shape
//! as the tool's own log entries so they can share one display sink.

use crate::model::{LogEntry, LogLevel, Operation, RunOutcome, RunRequest};
use crate::orchestrator::RunError;

const SEPARATOR: &str = "========================================";

/// Lines logged right before a run is handed to the tool.
pub(crate) fn start_banner(request: &RunRequest) -> Vec<LogEntry> {
    let verb = match request.operation {
        Operation::Decompile => "decompilation",
        Operation::Compile => "compilation",
    };
    vec![
        LogEntry::info(SEPARATOR),
        LogEntry::info(format!("Starting {verb} process...")),
        LogEntry::info(format!("Input: {}", request.input)),
        LogEntry::info(format!("Output: {}", request.output)),
        LogEntry::info(SEPARATOR),
    ]
}

/// Lines logged once the run settles.
pub(crate) fn build_summary(
    operation: Operation,
    result: &Result<RunOutcome, RunError>,
) -> Vec<LogEntry> {
    let mut lines = vec![LogEntry::info(SEPARATOR)];
    match result {
        Ok(outcome) if outcome.success => {
            lines.push(LogEntry::success(format!(
                "✓ {} completed successfully!",
                operation.noun()
            )));
            let payload = outcome.payload.clone().unwrap_or_default();
            lines.push(LogEntry::success(format!(
                "Output saved to: {}",
                payload.output.as_deref().unwrap_or("-")
            )));
            if let Some(meta) = payload.meta.as_deref() {
                lines.push(LogEntry::success(format!("Metadata saved to: {meta}")));
            }
            if operation == Operation::Compile {
                if let Some(size) = payload.size {
                    lines.push(LogEntry::success(format!("Total size: {size} bytes")));
                }
            }
        }
        Ok(outcome) => {
            lines.push(LogEntry::error(format!(
                "✗ {} failed: {}",
                operation.noun(),
                outcome.error().unwrap_or("unknown error")
            )));
        }
        Err(RunError::Precondition(e)) => {
            lines.push(LogEntry::new(LogLevel::Warning, format!("Cannot start: {e}")));
        }
        Err(RunError::Tool(e)) => {
            lines.push(LogEntry::error(format!("✗ Critical error: {}", e.message())));
        }
    }
    lines.push(LogEntry::info(SEPARATOR));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{reduce, SessionError};
    use crate::model::ResultPayload;

    #[test]
    fn banner_names_paths() {
        let lines = start_banner(&RunRequest {
            operation: Operation::Compile,
            input: "a.xml".into(),
            output: "a.ido".into(),
        });
        assert_eq!(lines[1].message, "Starting compilation process...");
        assert_eq!(lines[2].message, "Input: a.xml");
        assert_eq!(lines[3].message, "Output: a.ido");
    }

    #[test]
    fn compile_success_reports_size() {
        let payload = ResultPayload {
            success: true,
            output: Some("a.ido".into()),
            size: Some(2048),
            ..Default::default()
        };
        let lines = build_summary(Operation::Compile, &Ok(reduce(0, Some(payload), Vec::new())));
        let messages: Vec<_> = lines.iter().map(|l| l.message.as_str()).collect();
        assert!(messages.contains(&"✓ Compilation completed successfully!"));
        assert!(messages.contains(&"Output saved to: a.ido"));
        assert!(messages.contains(&"Total size: 2048 bytes"));
        assert!(lines
            .iter()
            .filter(|l| l.message != SEPARATOR)
            .all(|l| l.level == LogLevel::Success));
    }

    #[test]
    fn decompile_success_reports_meta() {
        let payload = ResultPayload {
            success: true,
            output: Some("a.xml".into()),
            meta: Some("a.meta".into()),
            ..Default::default()
        };
        let lines = build_summary(Operation::Decompile, &Ok(reduce(0, Some(payload), Vec::new())));
        assert!(lines.iter().any(|l| l.message == "Metadata saved to: a.meta"));
    }

    #[test]
    fn failures_are_errors() {
        let lines = build_summary(Operation::Decompile, &Ok(reduce(2, None, Vec::new())));
        assert_eq!(lines[1].level, LogLevel::Error);
        assert_eq!(lines[1].message, "✗ Decompilation failed: Process exited with code 2");

        let err = RunError::Tool(SessionError::Spawn {
            program: "python".into(),
            message: "not found".into(),
            logs: Vec::new(),
        });
        let lines = build_summary(Operation::Decompile, &Err(err));
        assert_eq!(lines[1].message, "✗ Critical error: not found");
    }
}
