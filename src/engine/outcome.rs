use crate::model::{LogEntry, ResultPayload, RunOutcome};

/// Exit code the tool uses for a structurally complete run.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Exit code reported when the process ended without one (killed by a signal).
pub const UNKNOWN_EXIT_CODE: i32 = -1;

pub const MISSING_RESULT: &str = "missing result";

/// Collapse a finished process into its single outcome.
///
/// Logs are carried through on every path so failures stay diagnosable.
pub fn reduce(exit_code: i32, result: Option<ResultPayload>, logs: Vec<LogEntry>) -> RunOutcome {
    let payload = match result {
        Some(payload) if exit_code == SUCCESS_EXIT_CODE => payload,
        None if exit_code == SUCCESS_EXIT_CODE => ResultPayload::failure(MISSING_RESULT),
        _ => ResultPayload::failure(format!("Process exited with code {exit_code}")),
    };
    RunOutcome {
        success: payload.success,
        payload: Some(payload),
        exit_code,
        logs,
    }
}
