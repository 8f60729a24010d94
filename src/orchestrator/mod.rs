//! Application-level orchestration.
//!
//! This module owns the per-operation workflow state, the run coordinator that gates
//! and executes runs, and the interactive controller that drives both from UI commands.
//! Presentation layers call into this module to keep responsibilities separated.

mod controller;
mod coordinator;
mod workflow;

pub(crate) use controller::{run_controller, UiCommand, UiEvent};
pub use coordinator::{RunCoordinator, RunError};
