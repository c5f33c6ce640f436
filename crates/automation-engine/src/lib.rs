//! Rule-based automation for a studio controller
//!
//! Rules bind a trigger (event, delayed event, interval, wall-clock time,
//! cron or manual) to an action plan executed against a [`Controller`].

pub mod action;
pub mod controller;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod scheduler;

pub use action::{ActionBuilder, ActionPlan, ActionStep, ExecutionContext, Step, StepKind};
pub use controller::{Controller, Operation};
pub use engine::{AutomationEngine, AutomationEvent};
pub use error::{ActionError, AutomationError, ControllerError, StepError};
pub use executor::{ActionExecutor, ExecutorEvent};
pub use model::*;
