//! Action executor for rules

use crate::action::{ActionPlan, ExecutionContext, Step, StepKind};
use crate::controller::Controller;
use crate::error::{ActionError, StepError};
use crate::evaluator::ConditionEvaluator;
use crate::model::{LogLevel, RuleId};
use event_bus::EventBus;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use studio_events::{Event, EventPayload};
use tokio::sync::broadcast;

/// Events emitted during action execution. Step indices are 1-based.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// Step started executing
    StepStarted { rule_id: RuleId, step_index: usize },
    /// Step completed successfully
    StepCompleted { rule_id: RuleId, step_index: usize },
    /// Step guard was false
    StepSkipped { rule_id: RuleId, step_index: usize },
    /// Step failed
    StepFailed {
        rule_id: RuleId,
        step_index: usize,
        error: String,
    },
}

/// Executor for action plans
pub struct ActionExecutor {
    controller: Arc<dyn Controller>,
    bus: Option<Arc<EventBus>>,
    evaluator: ConditionEvaluator,
    event_tx: broadcast::Sender<ExecutorEvent>,
}

impl ActionExecutor {
    /// Create a new action executor
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            controller,
            bus: None,
            evaluator: ConditionEvaluator::new(),
            event_tx,
        }
    }

    /// Attach the bus used by emit steps
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Subscribe to executor events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.event_tx.subscribe()
    }

    /// Execute a plan bounded by `timeout`
    pub async fn execute(
        &self,
        plan: &ActionPlan,
        ctx: &mut ExecutionContext,
        timeout: Duration,
    ) -> Result<(), ActionError> {
        let outcome = tokio::time::timeout(timeout, self.execute_plan(plan, ctx)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Action of rule '{}' timed out after {:?}",
                    ctx.rule_name,
                    timeout
                );
                Err(ActionError::TimedOut { timeout })
            }
        }
    }

    /// Execute the steps of a plan in order
    pub fn execute_plan<'a>(
        &'a self,
        plan: &'a ActionPlan,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<(), ActionError>> {
        Box::pin(async move {
            for (offset, step) in plan.steps().iter().enumerate() {
                let step_index = offset + 1;
                let rule_id = ctx.rule_id.clone();

                if let Some(guard) = &step.guard {
                    if !guard(&*ctx) {
                        tracing::debug!(
                            "Rule '{}' step {} ({}) skipped, condition not met",
                            ctx.rule_name,
                            step_index,
                            step.describe()
                        );
                        let _ = self.event_tx.send(ExecutorEvent::StepSkipped {
                            rule_id,
                            step_index,
                        });
                        continue;
                    }
                }

                let _ = self.event_tx.send(ExecutorEvent::StepStarted {
                    rule_id: rule_id.clone(),
                    step_index,
                });

                match self.execute_step(step, ctx).await {
                    Ok(()) => {
                        let _ = self.event_tx.send(ExecutorEvent::StepCompleted {
                            rule_id,
                            step_index,
                        });
                    }
                    Err(e) => {
                        let _ = self.event_tx.send(ExecutorEvent::StepFailed {
                            rule_id,
                            step_index,
                            error: e.to_string(),
                        });
                        if step.continue_on_error {
                            tracing::warn!(
                                "Rule '{}' step {} ({}) failed, continuing: {}",
                                ctx.rule_name,
                                step_index,
                                step.describe(),
                                e
                            );
                            continue;
                        }
                        return Err(ActionError::StepFailed {
                            step_index,
                            step: step.describe(),
                            reason: e,
                        });
                    }
                }
            }
            Ok(())
        })
    }

    /// Execute a single step
    async fn execute_step(&self, step: &Step, ctx: &mut ExecutionContext) -> Result<(), StepError> {
        match &step.kind {
            StepKind::Invoke(operation) => {
                let response = self.controller.execute(operation).await?;
                tracing::info!(
                    "Rule '{}': {} succeeded",
                    ctx.rule_name,
                    operation.request_type()
                );
                ctx.last_result = Some(response);
                Ok(())
            }
            StepKind::Wait(duration) => {
                tracing::debug!("Rule '{}' waiting {:?}", ctx.rule_name, duration);
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            StepKind::Emit(payload) => self.execute_emit(payload, ctx),
            StepKind::Log { level, message } => {
                execute_log(message, *level);
                Ok(())
            }
            StepKind::SetVariable { name, value } => {
                ctx.set_variable(name.clone(), value.clone());
                Ok(())
            }
            StepKind::Branch {
                condition,
                then,
                otherwise,
            } => {
                let taken = self
                    .evaluator
                    .evaluate(condition, ctx)
                    .map_err(|e| StepError::Condition(e.to_string()))?;
                let plan = if taken { then } else { otherwise };
                self.execute_plan(plan, ctx)
                    .await
                    .map_err(|e| StepError::Failed(e.to_string()))
            }
            StepKind::Custom(custom) => custom.run(ctx).await,
        }
    }

    fn execute_emit(&self, payload: &EventPayload, ctx: &ExecutionContext) -> Result<(), StepError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| StepError::Emit("No event bus attached".to_string()))?;
        let event = Event::new(payload.clone()).with_source(format!("rule:{}", ctx.rule_name));
        bus.emit(event).map_err(|e| StepError::Emit(e.to_string()))
    }
}

/// Execute a log step
fn execute_log(message: &str, level: LogLevel) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "automation", "{}", message),
        LogLevel::Info => tracing::info!(target: "automation", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "automation", "{}", message),
        LogLevel::Error => tracing::error!(target: "automation", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionBuilder, ActionStep};
    use crate::controller::Operation;
    use crate::error::ControllerError;
    use crate::model::Condition;
    use async_trait::async_trait;
    use event_bus::BusConfig;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records every operation; fails the ones listed in `fail_on`
    #[derive(Default)]
    struct RecordingController {
        calls: Mutex<Vec<Operation>>,
        fail_on: Vec<&'static str>,
    }

    impl RecordingController {
        fn failing_on(request: &'static str) -> Self {
            Self {
                calls: Mutex::default(),
                fail_on: vec![request],
            }
        }

        fn requests(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|op| op.request_type().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Controller for RecordingController {
        async fn execute(&self, operation: &Operation) -> Result<Value, ControllerError> {
            self.calls.lock().unwrap().push(operation.clone());
            if self.fail_on.contains(&operation.request_type()) {
                return Err(ControllerError::RequestFailed {
                    request: operation.request_type().to_string(),
                    message: "rejected".to_string(),
                });
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(RuleId::from("rule-1"), "test rule")
    }

    #[tokio::test]
    async fn test_failing_step_aborts_remaining_steps() {
        let controller = Arc::new(RecordingController::failing_on("SetInputMute"));
        let executor = ActionExecutor::new(controller.clone());
        let plan = ActionBuilder::new()
            .scene("BRB")
            .mute("Mic", true)
            .start_recording()
            .build();

        let err = executor
            .execute(&plan, &mut ctx(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(err.step_index(), Some(2));
        assert_eq!(controller.requests(), vec!["SetCurrentProgramScene", "SetInputMute"]);
    }

    #[tokio::test]
    async fn test_continue_on_error_proceeds() {
        let controller = Arc::new(RecordingController::failing_on("SetInputMute"));
        let executor = ActionExecutor::new(controller.clone());
        let plan = ActionBuilder::new()
            .scene("BRB")
            .mute("Mic", true)
            .continue_on_error()
            .start_recording()
            .build();

        executor
            .execute(&plan, &mut ctx(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            controller.requests(),
            vec!["SetCurrentProgramScene", "SetInputMute", "StartRecord"]
        );
    }

    #[tokio::test]
    async fn test_false_guard_skips_step_without_error() {
        let controller = Arc::new(RecordingController::default());
        let executor = ActionExecutor::new(controller.clone());
        let mut events = executor.subscribe();
        let plan = ActionBuilder::new()
            .if_condition(|ctx| ctx.variable("live").is_some())
            .start_streaming()
            .scene("Live")
            .build();

        executor
            .execute(&plan, &mut ctx(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(controller.requests(), vec!["SetCurrentProgramScene"]);
        assert!(matches!(
            events.recv().await.unwrap(),
            ExecutorEvent::StepSkipped { step_index: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_run() {
        let controller = Arc::new(RecordingController::default());
        let executor = ActionExecutor::new(controller.clone());
        let plan = ActionBuilder::new()
            .wait(Duration::from_secs(60))
            .stop_streaming()
            .build();

        let err = executor
            .execute(&plan, &mut ctx(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::TimedOut {
                timeout: Duration::from_secs(1)
            }
        );
        assert!(controller.requests().is_empty());
    }

    #[tokio::test]
    async fn test_branch_and_variables() {
        let controller = Arc::new(RecordingController::default());
        let executor = ActionExecutor::new(controller.clone());
        let plan = ActionBuilder::new()
            .set_variable("mode", json!("break"))
            .branch(
                Condition::Variable {
                    name: "mode".into(),
                    equals: json!("break"),
                },
                ActionBuilder::new().scene("BRB").build(),
                ActionBuilder::new().scene("Live").build(),
            )
            .build();

        let mut ctx = ctx();
        executor
            .execute(&plan, &mut ctx, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(controller.requests(), vec!["SetCurrentProgramScene"]);
        assert_eq!(
            controller.calls.lock().unwrap()[0],
            Operation::SetCurrentScene {
                scene_name: "BRB".into()
            }
        );
        assert_eq!(ctx.last_result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn test_custom_step_sees_context() {
        struct CountStep;

        #[async_trait]
        impl ActionStep for CountStep {
            fn name(&self) -> &str {
                "count"
            }

            async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), StepError> {
                let next = ctx.execution_count + 1;
                ctx.set_variable("next", json!(next));
                if next > 1 {
                    return Err(StepError::Failed("only once".into()));
                }
                Ok(())
            }
        }

        let executor = ActionExecutor::new(Arc::new(RecordingController::default()));
        let plan = ActionBuilder::new().custom(CountStep).build();

        let mut first = ctx();
        executor
            .execute(&plan, &mut first, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first.variable("next"), Some(&json!(1)));

        let mut second = ctx();
        second.execution_count = 1;
        let err = executor
            .execute(&plan, &mut second, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::StepFailed { ref step, .. } if step == "count"));
    }

    #[tokio::test]
    async fn test_emit_step_queues_event() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        bus.registry().register_custom("BreakStarted").unwrap();
        let executor =
            ActionExecutor::new(Arc::new(RecordingController::default())).with_bus(bus.clone());
        let plan = ActionBuilder::new()
            .emit(EventPayload::custom("BreakStarted", json!({ "minutes": 5 })))
            .build();

        executor
            .execute(&plan, &mut ctx(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bus.stats().emitted, 1);

        let unregistered = ActionBuilder::new()
            .emit(EventPayload::custom("Unknown", json!({})))
            .build();
        let err = executor
            .execute(&unregistered, &mut ctx(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::StepFailed {
                step_index: 1,
                reason: StepError::Emit(_),
                ..
            }
        ));
    }
}
