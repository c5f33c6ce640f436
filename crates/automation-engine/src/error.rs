//! Error types for the automation engine

use event_bus::BusError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// Rule is disabled
    #[error("Rule is disabled: {0}")]
    Disabled(String),

    /// Malformed rule or trigger specification
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid condition configuration
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid time format
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// The engine has been stopped
    #[error("Automation engine is stopped")]
    Stopped,

    /// The rule's action failed
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Event bus rejected a registration
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),
}

/// Failure of one action run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// A step failed without `continue_on_error`; `step_index` is 1-based
    #[error("Step {step_index} ({step}) failed: {reason}")]
    StepFailed {
        step_index: usize,
        step: String,
        reason: StepError,
    },

    /// The whole run exceeded its time budget
    #[error("Action timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

impl ActionError {
    /// 1-based index of the failing step, if a step failed
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::StepFailed { step_index, .. } => Some(*step_index),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Failure of a single step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Synthetic event could not be emitted
    #[error("Failed to emit event: {0}")]
    Emit(String),

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors reported by the external controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("Request {request} failed: {message}")]
    RequestFailed { request: String, message: String },

    #[error("Controller unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
