//! Run coordinator.
//!
//! Owns both workflow states, gates new runs on them and hands accepted requests to a
//! [`ToolLauncher`]. The busy flag is cleared on every exit path, including a dropped
//! `execute` future.

use super::workflow::{PreconditionError, WorkflowState, Workflows};
use crate::engine::{SessionError, ToolLauncher};
use crate::model::{LogEntry, Operation, RunOutcome, RunRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Tool(#[from] SessionError),
}

pub struct RunCoordinator {
    launcher: Arc<dyn ToolLauncher>,
    workflows: Mutex<Workflows>,
}

/// Releases the busy flag when dropped.
struct BusyGuard<'a> {
    workflows: &'a Mutex<Workflows>,
    operation: Operation,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.workflows.lock().get_mut(self.operation).release();
    }
}

impl RunCoordinator {
    pub fn new(launcher: Arc<dyn ToolLauncher>) -> Self {
        Self {
            launcher,
            workflows: Mutex::new(Workflows::default()),
        }
    }

    /// Apply a selection action (or any read) to one workflow.
    pub fn update<R>(&self, operation: Operation, f: impl FnOnce(&mut WorkflowState) -> R) -> R {
        f(self.workflows.lock().get_mut(operation))
    }

    pub fn snapshot(&self, operation: Operation) -> WorkflowState {
        self.workflows.lock().get(operation).clone()
    }

    /// Claim the workflow for a run, snapshotting its selections.
    ///
    /// Fails without side effects if the workflow is busy or a selection is missing.
    pub fn begin(&self, operation: Operation) -> Result<StartedRun<'_>, PreconditionError> {
        let request = self.workflows.lock().get_mut(operation).begin()?;
        info!(%operation, input = %request.input, output = %request.output, "run started");
        Ok(StartedRun {
            coordinator: self,
            request,
            _guard: BusyGuard {
                workflows: &self.workflows,
                operation,
            },
        })
    }

    /// Run the operation with the workflow's current selections.
    ///
    /// Precondition failures return before anything is spawned. Every log entry the tool
    /// produces is pushed to `event_tx` as it is decoded.
    pub async fn execute(
        &self,
        operation: Operation,
        event_tx: UnboundedSender<LogEntry>,
    ) -> Result<RunOutcome, RunError> {
        let started = self.begin(operation)?;
        started.run(event_tx).await.map_err(RunError::from)
    }
}

/// A run that holds its workflow's busy flag until it settles or is dropped.
pub struct StartedRun<'a> {
    coordinator: &'a RunCoordinator,
    request: RunRequest,
    _guard: BusyGuard<'a>,
}

impl StartedRun<'_> {
    pub fn request(&self) -> &RunRequest {
        &self.request
    }

    pub async fn run(self, event_tx: UnboundedSender<LogEntry>) -> Result<RunOutcome, SessionError> {
        let StartedRun {
            coordinator,
            request,
            _guard: guard,
        } = self;
        let result = coordinator.launcher.launch(&request, event_tx).await;

        drop(guard);
        let operation = request.operation;
        coordinator
            .workflows
            .lock()
            .get_mut(operation)
            .record(&result);
        match &result {
            Ok(outcome) => info!(
                %operation,
                success = outcome.success,
                exit_code = outcome.exit_code,
                "run finished"
            ),
            Err(e) => warn!(%operation, error = %e, "tool could not run"),
        }
        result
    }
}
