//! Action plans and the fluent builder that composes them

use crate::controller::Operation;
use crate::error::StepError;
use crate::model::{Condition, LogLevel, RuleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use studio_events::{Event, EventPayload};

/// Guard evaluated against the execution context before a step runs
pub type ContextPredicate = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// Per-run state handed to every step
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub rule_id: RuleId,
    pub rule_name: String,
    /// Event that fired the rule, for event-driven triggers
    pub trigger_event: Option<Arc<Event>>,
    pub trigger_time: DateTime<Utc>,
    /// Successful runs of the rule before this one
    pub execution_count: u64,
    /// Scratch variables, seeded from the engine's variables
    pub variables: HashMap<String, Value>,
    /// Response of the most recent controller call
    pub last_result: Option<Value>,
}

impl ExecutionContext {
    pub fn new(rule_id: RuleId, rule_name: impl Into<String>) -> Self {
        Self {
            rule_id,
            rule_name: rule_name.into(),
            trigger_event: None,
            trigger_time: Utc::now(),
            execution_count: 0,
            variables: HashMap::new(),
            last_result: None,
        }
    }

    #[must_use]
    pub fn with_trigger_event(mut self, event: Arc<Event>) -> Self {
        self.trigger_event = Some(event);
        self
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }
}

/// User-supplied step
#[async_trait]
pub trait ActionStep: Send + Sync {
    /// Label used in logs and errors
    fn name(&self) -> &str {
        "custom"
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StepError>;
}

/// Primitive operation performed by a step
#[derive(Clone)]
pub enum StepKind {
    /// Issue an operation against the controller
    Invoke(Operation),
    /// Suspend this run only
    Wait(Duration),
    /// Emit a synthetic event back into the bus
    Emit(EventPayload),
    Log { level: LogLevel, message: String },
    SetVariable { name: String, value: Value },
    /// Run one of two sub-plans depending on a condition
    Branch {
        condition: Condition,
        then: ActionPlan,
        otherwise: ActionPlan,
    },
    Custom(Arc<dyn ActionStep>),
}

/// A step with its execution policy
#[derive(Clone)]
pub struct Step {
    pub kind: StepKind,
    /// Skip the step (without error) when this returns false
    pub guard: Option<ContextPredicate>,
    /// Keep going with the next step if this one fails
    pub continue_on_error: bool,
}

impl Step {
    #[must_use]
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            guard: None,
            continue_on_error: false,
        }
    }

    /// Short description for logs and errors
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::Invoke(op) => format!("invoke {}", op.request_type()),
            StepKind::Wait(d) => format!("wait {d:?}"),
            StepKind::Emit(payload) => format!("emit {}", payload.event_type()),
            StepKind::Log { .. } => "log".to_string(),
            StepKind::SetVariable { name, .. } => format!("set {name}"),
            StepKind::Branch { .. } => "branch".to_string(),
            StepKind::Custom(step) => step.name().to_string(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("step", &self.describe())
            .field("guarded", &self.guard.is_some())
            .field("continue_on_error", &self.continue_on_error)
            .finish()
    }
}

/// Immutable, shareable sequence of steps
#[derive(Clone, Default)]
pub struct ActionPlan {
    steps: Arc<[Step]>,
}

impl ActionPlan {
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl From<Vec<Step>> for ActionPlan {
    fn from(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

impl fmt::Debug for ActionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter()).finish()
    }
}

/// Fluent composition of action plans
///
/// ```ignore
/// let plan = ActionBuilder::new()
///     .scene("BRB")
///     .mute("Mic", true)
///     .wait(Duration::from_secs(2))
///     .if_condition(|ctx| ctx.execution_count == 0)
///     .text("Banner", "Back soon")
///     .build();
/// ```
#[derive(Default)]
pub struct ActionBuilder {
    steps: Vec<Step>,
    pending_guard: Option<ContextPredicate>,
}

impl ActionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; a pending `if_condition` guard attaches to it
    #[must_use]
    pub fn step(mut self, kind: StepKind) -> Self {
        let mut step = Step::new(kind);
        step.guard = self.pending_guard.take();
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn invoke(self, operation: Operation) -> Self {
        self.step(StepKind::Invoke(operation))
    }

    /// Switch to a scene
    pub fn scene(self, scene_name: impl Into<String>) -> Self {
        self.invoke(Operation::SetCurrentScene {
            scene_name: scene_name.into(),
        })
    }

    /// Mute or unmute an input
    pub fn mute(self, input_name: impl Into<String>, muted: bool) -> Self {
        self.invoke(Operation::SetInputMute {
            input_name: input_name.into(),
            muted,
        })
    }

    pub fn toggle_mute(self, input_name: impl Into<String>) -> Self {
        self.invoke(Operation::ToggleInputMute {
            input_name: input_name.into(),
        })
    }

    /// Set input volume in dB and/or as a multiplier
    pub fn volume(
        self,
        input_name: impl Into<String>,
        volume_db: Option<f64>,
        volume_mul: Option<f64>,
    ) -> Self {
        self.invoke(Operation::SetInputVolume {
            input_name: input_name.into(),
            volume_db,
            volume_mul,
        })
    }

    /// Update a text source
    pub fn text(self, source_name: impl Into<String>, text: impl Into<String>) -> Self {
        self.invoke(Operation::SetTextSource {
            source_name: source_name.into(),
            text: text.into(),
        })
    }

    #[must_use]
    pub fn start_recording(self) -> Self {
        self.invoke(Operation::StartRecord)
    }

    #[must_use]
    pub fn stop_recording(self) -> Self {
        self.invoke(Operation::StopRecord)
    }

    #[must_use]
    pub fn start_streaming(self) -> Self {
        self.invoke(Operation::StartStream)
    }

    #[must_use]
    pub fn stop_streaming(self) -> Self {
        self.invoke(Operation::StopStream)
    }

    #[must_use]
    pub fn wait(self, duration: Duration) -> Self {
        self.step(StepKind::Wait(duration))
    }

    #[must_use]
    pub fn emit(self, payload: EventPayload) -> Self {
        self.step(StepKind::Emit(payload))
    }

    pub fn log(self, level: LogLevel, message: impl Into<String>) -> Self {
        self.step(StepKind::Log {
            level,
            message: message.into(),
        })
    }

    pub fn set_variable(self, name: impl Into<String>, value: Value) -> Self {
        self.step(StepKind::SetVariable {
            name: name.into(),
            value,
        })
    }

    #[must_use]
    pub fn branch(self, condition: Condition, then: ActionPlan, otherwise: ActionPlan) -> Self {
        self.step(StepKind::Branch {
            condition,
            then,
            otherwise,
        })
    }

    pub fn custom(self, step: impl ActionStep + 'static) -> Self {
        self.step(StepKind::Custom(Arc::new(step)))
    }

    /// Guard the next step; it is skipped when the predicate is false
    pub fn if_condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.pending_guard = Some(Arc::new(predicate));
        self
    }

    /// Let the plan continue when the most recently added step fails
    #[must_use]
    pub fn continue_on_error(mut self) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.continue_on_error = true;
        }
        self
    }

    /// Freeze into a reusable plan. A trailing guard with no step is dropped.
    #[must_use]
    pub fn build(self) -> ActionPlan {
        if self.pending_guard.is_some() {
            tracing::warn!("Dropping if_condition guard with no following step");
        }
        ActionPlan::from(self.steps)
    }
}
