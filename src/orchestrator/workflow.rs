//! Per-operation selection state and the busy gate.

use crate::engine::SessionError;
use crate::model::{InputKind, Operation, RunOutcome, RunRequest};
use std::path::Path;

/// Phase derived from selections and the busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Idle,
    Ready,
    Running,
}

/// How the last run ended, kept for status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Complete { output: Option<String> },
    Failed { error: String },
    /// The tool could not run at all.
    Error { error: String },
}

/// A run may not start from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("a {0} run is already in progress")]
    Busy(Operation),
    #[error("no input selected for {0}")]
    MissingInput(Operation),
    #[error("no output selected for {0}")]
    MissingOutput(Operation),
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    operation: Operation,
    input: Option<String>,
    output: Option<String>,
    busy: bool,
    last: Option<TerminalStatus>,
}

impl WorkflowState {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            input: None,
            output: None,
            busy: false,
            last: None,
        }
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn last_status(&self) -> Option<&TerminalStatus> {
        self.last.as_ref()
    }

    /// Set the input. When no output is chosen yet one is suggested and returned.
    ///
    /// Allowed while running; the in-flight run keeps its own request snapshot.
    pub fn select_input(&mut self, path: impl Into<String>, kind: InputKind) -> Option<&str> {
        let path = path.into();
        let suggestion = if self.output.is_none() {
            Some(
                self.operation
                    .suggest_output(Path::new(&path), kind)
                    .to_string_lossy()
                    .into_owned(),
            )
        } else {
            None
        };
        self.input = Some(path);
        if suggestion.is_some() {
            self.output = suggestion;
            return self.output.as_deref();
        }
        None
    }

    pub fn select_output(&mut self, path: impl Into<String>) {
        self.output = Some(path.into());
    }

    /// Name proposed to the save picker for this workflow.
    pub fn default_output_name(&self) -> String {
        self.operation
            .default_output_name(self.input.as_deref().map(Path::new))
    }

    pub fn phase(&self) -> WorkflowPhase {
        if self.busy {
            WorkflowPhase::Running
        } else if self.input.is_some() && self.output.is_some() {
            WorkflowPhase::Ready
        } else {
            WorkflowPhase::Idle
        }
    }

    /// Whether the run affordance should be enabled.
    pub fn can_run(&self) -> bool {
        self.phase() == WorkflowPhase::Ready
    }

    /// Snapshot a request and mark the workflow busy.
    pub(crate) fn begin(&mut self) -> Result<RunRequest, PreconditionError> {
        if self.busy {
            return Err(PreconditionError::Busy(self.operation));
        }
        let input = self
            .input
            .clone()
            .ok_or(PreconditionError::MissingInput(self.operation))?;
        let output = self
            .output
            .clone()
            .ok_or(PreconditionError::MissingOutput(self.operation))?;
        self.busy = true;
        Ok(RunRequest {
            operation: self.operation,
            input,
            output,
        })
    }

    /// Clear the busy flag. Selections are kept so the user can re-run.
    pub(crate) fn release(&mut self) {
        self.busy = false;
    }

    pub(crate) fn record(&mut self, result: &Result<RunOutcome, SessionError>) {
        self.last = Some(match result {
            Ok(outcome) if outcome.success => TerminalStatus::Complete {
                output: outcome.output().map(str::to_string),
            },
            Ok(outcome) => TerminalStatus::Failed {
                error: outcome.error().unwrap_or("unknown error").to_string(),
            },
            Err(e) => TerminalStatus::Error {
                error: e.message().to_string(),
            },
        });
    }

    /// Status line as `(text, details)`.
    pub fn status(&self) -> (&'static str, String) {
        if self.is_busy() {
            return ("Processing...", "Please wait".to_string());
        }
        match self.last_status() {
            None => ("Idle", String::new()),
            Some(TerminalStatus::Complete { output }) => {
                let name = output
                    .as_deref()
                    .and_then(|o| Path::new(o).file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let verb = match self.operation {
                    Operation::Decompile => "Decompiled",
                    Operation::Compile => "Compiled",
                };
                ("Complete", format!("{verb}: {name}"))
            }
            Some(TerminalStatus::Failed { error }) => ("Failed", error.clone()),
            Some(TerminalStatus::Error { error }) => ("Error", error.clone()),
        }
    }
}

/// The two independent workflows.
#[derive(Debug, Clone)]
pub struct Workflows {
    pub decompile: WorkflowState,
    pub compile: WorkflowState,
}

impl Default for Workflows {
    fn default() -> Self {
        Self {
            decompile: WorkflowState::new(Operation::Decompile),
            compile: WorkflowState::new(Operation::Compile),
        }
    }
}

impl Workflows {
    pub fn get(&self, operation: Operation) -> &WorkflowState {
        match operation {
            Operation::Decompile => &self.decompile,
            Operation::Compile => &self.compile,
        }
    }

    pub fn get_mut(&mut self, operation: Operation) -> &mut WorkflowState {
        match operation {
            Operation::Decompile => &mut self.decompile,
            Operation::Compile => &mut self.compile,
        }
    }
}
