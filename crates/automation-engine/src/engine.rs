//! Core automation engine

use crate::action::ExecutionContext;
use crate::controller::Controller;
use crate::error::{ActionError, AutomationError};
use crate::evaluator::ConditionEvaluator;
use crate::executor::{ActionExecutor, ExecutorEvent};
use crate::model::{
    DelayPolicy, EngineConfig, EngineStats, ExecutionOutcome, ExecutionRecord, Rule, RuleId,
    RuleState, RuleStatus, Trigger, TriggerOutcome,
};
use crate::scheduler::{FireReason, FireRequest, Scheduler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use event_bus::{EventBus, EventHandler, HandlerError, HandlerId};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use studio_events::Event;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Events emitted by the automation engine
#[derive(Debug, Clone)]
pub enum AutomationEvent {
    /// A rule was registered
    Created { rule_id: RuleId },
    /// A rule was removed
    Removed { rule_id: RuleId },
    Enabled { rule_id: RuleId },
    Disabled { rule_id: RuleId },
    /// A rule started a run
    Triggered { rule_id: RuleId, reason: String },
    /// A run finished successfully
    Completed { rule_id: RuleId, elapsed: Duration },
    /// A run failed
    Failed { rule_id: RuleId, error: String },
    /// A trigger match was ignored
    Suppressed { rule_id: RuleId, reason: String },
}

/// End of the cooldown window that follows a successful run
#[derive(Debug, Clone, Copy, Default)]
enum CooldownEnd {
    #[default]
    None,
    At(Instant),
    Never,
}

impl CooldownEnd {
    fn is_active(self, now: Instant) -> bool {
        match self {
            Self::None => false,
            Self::At(until) => now < until,
            Self::Never => true,
        }
    }
}

/// Mutable per-rule state, guarded by the rule's lock
#[derive(Default)]
struct RuleRuntime {
    enabled: bool,
    running: bool,
    cooldown: CooldownEnd,
    execution_count: u64,
    failure_count: u64,
    suppressed_count: u64,
    last_fired_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    pending: HashMap<u64, AbortHandle>,
    next_token: u64,
    history: VecDeque<ExecutionRecord>,
}

impl RuleRuntime {
    fn state(&self, now: Instant) -> RuleState {
        if !self.enabled {
            RuleState::Disabled
        } else if self.running {
            RuleState::Running
        } else if self.cooldown.is_active(now) {
            RuleState::Cooldown
        } else if !self.pending.is_empty() {
            RuleState::Scheduled
        } else {
            RuleState::Idle
        }
    }

    fn cancel_pending(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

struct RuleEntry {
    rule: Rule,
    runtime: Mutex<RuleRuntime>,
    handler: Mutex<Option<HandlerId>>,
}

impl RuleEntry {
    fn runtime(&self) -> MutexGuard<'_, RuleRuntime> {
        lock(&self.runtime)
    }
}

/// Bus handler feeding event-driven triggers into the engine
struct RuleTriggerHandler {
    engine: Weak<AutomationEngine>,
    rule_id: RuleId,
}

#[async_trait]
impl EventHandler for RuleTriggerHandler {
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        if let Some(engine) = self.engine.upgrade() {
            engine.on_event(&self.rule_id, event);
        }
        Ok(())
    }
}

/// A run that passed the state gate
struct RunTicket {
    ctx: ExecutionContext,
    fired_at: Instant,
    reason: FireReason,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

/// The main automation engine
pub struct AutomationEngine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    /// All registered rules
    rules: DashMap<RuleId, Arc<RuleEntry>>,
    evaluator: ConditionEvaluator,
    executor: ActionExecutor,
    scheduler: Scheduler,
    /// Engine-wide variables seeded into every execution context
    variables: DashMap<String, Value>,
    fire_tx: mpsc::Sender<FireRequest>,
    fire_rx: Mutex<Option<mpsc::Receiver<FireRequest>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    started: AtomicBool,
    counters: Counters,
    /// Event broadcaster
    event_tx: broadcast::Sender<AutomationEvent>,
}

impl AutomationEngine {
    /// Create a new automation engine driving `controller`
    pub fn new(bus: Arc<EventBus>, controller: Arc<dyn Controller>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let (fire_tx, fire_rx) = mpsc::channel(config.fire_queue_capacity.max(1));
        let executor = ActionExecutor::new(controller).with_bus(Arc::clone(&bus));

        Self {
            config,
            bus,
            rules: DashMap::new(),
            evaluator: ConditionEvaluator::new(),
            executor,
            scheduler: Scheduler::new(fire_tx.clone()),
            variables: DashMap::new(),
            fire_tx,
            fire_rx: Mutex::new(Some(fire_rx)),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            counters: Counters::default(),
            event_tx,
        }
    }

    /// Start the fire loop and the timers of enabled rules
    pub fn start(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut fire_rx) = lock(&self.fire_rx).take() else {
            return;
        };

        for entry in self.rules.iter() {
            if entry.runtime().enabled {
                if let Err(e) = self.scheduler.register(&entry.rule) {
                    tracing::warn!("Failed to schedule rule {}: {}", entry.rule.name, e);
                }
            }
        }

        let engine = Arc::clone(self);
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = engine.shutdown.cancelled() => break,
                    request = fire_rx.recv() => match request {
                        Some(request) => engine.handle_fire(request),
                        None => break,
                    },
                }
            }
            tracing::debug!("Fire loop stopped");
        });

        tracing::info!("Automation engine started with {} rule(s)", self.rules.len());
    }

    /// Stop timers and wait for in-flight runs to finish
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.scheduler.clear();
        for entry in self.rules.iter() {
            entry.runtime().cancel_pending();
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Automation engine stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    /// Subscribe to automation events
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to step-level executor events
    pub fn subscribe_steps(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.executor.subscribe()
    }

    /// Validate and register a rule
    pub fn add_rule(self: &Arc<Self>, rule: Rule) -> Result<RuleId, AutomationError> {
        if self.shutdown.is_cancelled() {
            return Err(AutomationError::Stopped);
        }
        rule.validate(self.bus.registry())?;
        if self.rules.contains_key(&rule.id) {
            return Err(AutomationError::Validation(format!(
                "Rule already exists: {}",
                rule.id
            )));
        }

        let id = rule.id.clone();
        let entry = Arc::new(RuleEntry {
            runtime: Mutex::new(RuleRuntime {
                enabled: rule.enabled,
                ..RuleRuntime::default()
            }),
            handler: Mutex::new(None),
            rule,
        });

        if let Some(event_type) = entry.rule.trigger.event_type() {
            let predicate = match &entry.rule.trigger {
                Trigger::Event { predicate, .. } | Trigger::Delay { predicate, .. } => {
                    Arc::clone(predicate)
                }
                _ => event_bus::always(),
            };
            let handler = Arc::new(RuleTriggerHandler {
                engine: Arc::downgrade(self),
                rule_id: id.clone(),
            });
            let handler_id = self.bus.register(
                event_type.clone(),
                predicate,
                entry.rule.priority,
                handler,
            )?;
            *lock(&entry.handler) = Some(handler_id);
        }

        if entry.rule.enabled && self.is_running() {
            if let Err(e) = self.scheduler.register(&entry.rule) {
                self.unregister_handler(&entry);
                return Err(e);
            }
        }

        tracing::info!(
            "Created rule: {} ({}, {} trigger)",
            entry.rule.name,
            id,
            entry.rule.trigger.kind()
        );
        self.rules.insert(id.clone(), entry);
        let _ = self.event_tx.send(AutomationEvent::Created {
            rule_id: id.clone(),
        });
        Ok(id)
    }

    /// Remove a rule. An in-flight run finishes under its original context.
    pub fn remove_rule(&self, id: &RuleId) -> Result<Rule, AutomationError> {
        let (_, entry) = self
            .rules
            .remove(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        self.scheduler.remove(id);
        self.unregister_handler(&entry);
        {
            let mut runtime = entry.runtime();
            runtime.enabled = false;
            runtime.cancel_pending();
        }

        let _ = self.event_tx.send(AutomationEvent::Removed {
            rule_id: id.clone(),
        });
        tracing::info!("Removed rule: {} ({})", entry.rule.name, id);
        Ok(entry.rule.clone())
    }

    /// Enable a rule
    pub fn enable_rule(&self, id: &RuleId) -> Result<(), AutomationError> {
        let entry = self.entry(id)?;
        {
            let mut runtime = entry.runtime();
            if runtime.enabled {
                return Ok(());
            }
            runtime.enabled = true;
        }
        if self.is_running() {
            self.scheduler.register(&entry.rule)?;
        }

        let _ = self.event_tx.send(AutomationEvent::Enabled {
            rule_id: id.clone(),
        });
        tracing::info!("Enabled rule: {}", entry.rule.name);
        Ok(())
    }

    /// Disable a rule. Pending delayed fires are dropped.
    pub fn disable_rule(&self, id: &RuleId) -> Result<(), AutomationError> {
        let entry = self.entry(id)?;
        {
            let mut runtime = entry.runtime();
            if !runtime.enabled {
                return Ok(());
            }
            runtime.enabled = false;
            runtime.cancel_pending();
        }
        self.scheduler.remove(id);

        let _ = self.event_tx.send(AutomationEvent::Disabled {
            rule_id: id.clone(),
        });
        tracing::info!("Disabled rule: {}", entry.rule.name);
        Ok(())
    }

    /// Manually run a rule and wait for the result
    pub async fn trigger(&self, id: &RuleId) -> Result<TriggerOutcome, AutomationError> {
        if self.shutdown.is_cancelled() {
            return Err(AutomationError::Stopped);
        }
        let entry = self.entry(id)?;
        if !entry.runtime().enabled {
            return Err(AutomationError::Disabled(id.to_string()));
        }

        match self.begin_run(&entry, FireReason::Manual, None, None) {
            Some(ticket) => self.run(&entry, ticket).await,
            None => Ok(TriggerOutcome::Suppressed),
        }
    }

    /// Get a rule by ID
    #[must_use]
    pub fn get(&self, id: &RuleId) -> Option<Rule> {
        self.rules.get(id).map(|entry| entry.rule.clone())
    }

    /// Status of every rule
    #[must_use]
    pub fn list(&self) -> Vec<RuleStatus> {
        let mut statuses: Vec<RuleStatus> =
            self.rules.iter().map(|entry| status_of(&entry)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Diagnostics of one rule
    #[must_use]
    pub fn status(&self, id: &RuleId) -> Option<RuleStatus> {
        self.rules.get(id).map(|entry| status_of(&entry))
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rules: self.rules.len(),
            enabled_rules: self
                .rules
                .iter()
                .filter(|entry| entry.runtime().enabled)
                .count(),
            total_executions: self.counters.total.load(Ordering::Relaxed),
            successful_executions: self.counters.successful.load(Ordering::Relaxed),
            failed_executions: self.counters.failed.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Set an engine-wide variable visible to future runs
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).map(|v| v.value().clone())
    }

    fn entry(&self, id: &RuleId) -> Result<Arc<RuleEntry>, AutomationError> {
        self.rules
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))
    }

    fn unregister_handler(&self, entry: &RuleEntry) {
        if let Some(handler_id) = lock(&entry.handler).take() {
            self.bus.unregister(handler_id);
        }
    }

    /// Entry point of the internal bus handler
    fn on_event(self: &Arc<Self>, rule_id: &RuleId, event: Arc<Event>) {
        if !self.is_running() {
            tracing::debug!(
                "Engine not running, ignoring {} for rule {}",
                event.event_type(),
                rule_id
            );
            return;
        }
        let Ok(entry) = self.entry(rule_id) else {
            return;
        };

        match &entry.rule.trigger {
            Trigger::Delay { delay, .. } => self.schedule_delayed(&entry, event, *delay),
            _ => {
                if let Some(ticket) = self.begin_run(&entry, FireReason::Event, Some(event), None) {
                    self.spawn_run(entry, ticket);
                }
            }
        }
    }

    /// Arm a delayed fire, honouring the rule's delay policy
    fn schedule_delayed(
        self: &Arc<Self>,
        entry: &Arc<RuleEntry>,
        event: Arc<Event>,
        delay: Duration,
    ) {
        let rule = &entry.rule;
        let mut runtime = entry.runtime();

        match runtime.state(Instant::now()) {
            RuleState::Disabled => return,
            RuleState::Scheduled if rule.delay_policy == DelayPolicy::Debounce => {
                tracing::debug!(
                    "Rule '{}' already has a pending fire, ignoring match",
                    rule.name
                );
                return;
            }
            RuleState::Idle | RuleState::Scheduled => {}
            state @ (RuleState::Running | RuleState::Cooldown) => {
                drop(runtime);
                self.suppress(entry, state);
                return;
            }
        }

        let token = runtime.next_token;
        runtime.next_token += 1;

        let fire_tx = self.fire_tx.clone();
        let request = FireRequest {
            rule_id: rule.id.clone(),
            reason: FireReason::Delay,
            trigger_event: Some(event),
            pending_token: Some(token),
        };
        let task = self.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            if fire_tx.send(request).await.is_err() {
                tracing::debug!("Fire loop closed before delayed fire was delivered");
            }
        });
        runtime.pending.insert(token, task.abort_handle());

        tracing::debug!(
            "Rule '{}' scheduled to fire in {:?} ({} pending)",
            rule.name,
            delay,
            runtime.pending.len()
        );
    }

    /// Handle a request from the fire queue
    fn handle_fire(self: &Arc<Self>, request: FireRequest) {
        let Ok(entry) = self.entry(&request.rule_id) else {
            tracing::debug!("Dropping fire for removed rule {}", request.rule_id);
            return;
        };
        if let Some(ticket) = self.begin_run(
            &entry,
            request.reason,
            request.trigger_event,
            request.pending_token,
        ) {
            self.spawn_run(entry, ticket);
        }
    }

    /// Apply the state gate under the rule's lock
    fn begin_run(
        &self,
        entry: &Arc<RuleEntry>,
        reason: FireReason,
        trigger_event: Option<Arc<Event>>,
        pending_token: Option<u64>,
    ) -> Option<RunTicket> {
        let rule = &entry.rule;
        let mut runtime = entry.runtime();

        if let Some(token) = pending_token {
            // Absent when cancelled by disable/remove/stop
            runtime.pending.remove(&token)?;
        }

        let now = Instant::now();
        let state = runtime.state(now);
        let blocked = match state {
            RuleState::Idle | RuleState::Scheduled => false,
            RuleState::Disabled => return None,
            RuleState::Running | RuleState::Cooldown => true,
        };
        if blocked {
            drop(runtime);
            self.suppress(entry, state);
            return None;
        }
        if rule
            .max_executions
            .is_some_and(|max| runtime.execution_count >= max)
        {
            runtime.suppressed_count += 1;
            drop(runtime);
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Rule '{}' reached its execution limit", rule.name);
            let _ = self.event_tx.send(AutomationEvent::Suppressed {
                rule_id: rule.id.clone(),
                reason: "max_executions".to_string(),
            });
            return None;
        }

        runtime.running = true;
        runtime.cooldown = CooldownEnd::None;
        runtime.last_fired_at = Some(Utc::now());

        let mut ctx = ExecutionContext::new(rule.id.clone(), rule.name.clone());
        ctx.trigger_event = trigger_event;
        ctx.execution_count = runtime.execution_count;
        ctx.variables = self
            .variables
            .iter()
            .map(|v| (v.key().clone(), v.value().clone()))
            .collect();

        Some(RunTicket {
            ctx,
            fired_at: now,
            reason,
        })
    }

    fn suppress(&self, entry: &RuleEntry, state: RuleState) {
        entry.runtime().suppressed_count += 1;
        self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
        let reason = match state {
            RuleState::Cooldown => "cooldown",
            _ => "busy",
        };
        tracing::debug!("Rule '{}' in {}, skipping", entry.rule.name, reason);
        let _ = self.event_tx.send(AutomationEvent::Suppressed {
            rule_id: entry.rule.id.clone(),
            reason: reason.to_string(),
        });
    }

    fn spawn_run(self: &Arc<Self>, entry: Arc<RuleEntry>, ticket: RunTicket) {
        let engine = Arc::clone(self);
        self.tracker.spawn(async move {
            if let Err(e) = engine.run(&entry, ticket).await {
                tracing::error!("Failed to execute rule '{}': {}", entry.rule.name, e);
            }
        });
    }

    /// Evaluate conditions, execute the action and settle the rule's state
    async fn run(
        &self,
        entry: &RuleEntry,
        ticket: RunTicket,
    ) -> Result<TriggerOutcome, AutomationError> {
        let rule = &entry.rule;
        let RunTicket {
            mut ctx,
            fired_at,
            reason,
        } = ticket;
        let started_at = ctx.trigger_time;

        tracing::info!("Executing rule '{}' (trigger: {})", rule.name, reason);
        let _ = self.event_tx.send(AutomationEvent::Triggered {
            rule_id: rule.id.clone(),
            reason: reason.to_string(),
        });

        match self.evaluator.evaluate_all(&rule.conditions, &ctx) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Rule '{}' conditions not met, skipping", rule.name);
                let mut runtime = entry.runtime();
                runtime.running = false;
                self.push_history(
                    &mut runtime,
                    record(started_at, reason, ExecutionOutcome::ConditionsNotMet, None, 0),
                );
                return Ok(TriggerOutcome::ConditionsNotMet);
            }
            Err(e) => {
                let mut runtime = entry.runtime();
                runtime.running = false;
                runtime.failure_count += 1;
                runtime.last_error = Some(e.to_string());
                self.push_history(
                    &mut runtime,
                    record(started_at, reason, ExecutionOutcome::Failed, Some(e.to_string()), 0),
                );
                drop(runtime);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let timeout = rule.timeout.unwrap_or_else(|| self.config.action_timeout());
        let max_attempts = rule.retry.map_or(0, |r| r.attempts).saturating_add(1);
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let mut attempt_ctx = ctx.clone();
            match self.executor.execute(&rule.action, &mut attempt_ctx, timeout).await {
                Ok(()) => {
                    ctx = attempt_ctx;
                    break Ok(());
                }
                Err(e) if attempts < max_attempts => {
                    let backoff = rule.retry.map_or(Duration::ZERO, |r| r.backoff);
                    tracing::warn!(
                        "Rule '{}' attempt {} failed, retrying in {:?}: {}",
                        rule.name,
                        attempts,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => break Err(e),
            }
        };

        let mut runtime = entry.runtime();
        runtime.running = false;
        match result {
            Ok(()) => {
                runtime.execution_count += 1;
                if !rule.cooldown.is_zero() {
                    // Past the clock's range the window never closes
                    runtime.cooldown = fired_at
                        .checked_add(rule.cooldown)
                        .map_or(CooldownEnd::Never, CooldownEnd::At);
                }
                self.push_history(
                    &mut runtime,
                    record(started_at, reason, ExecutionOutcome::Success, None, attempts),
                );
                drop(runtime);

                self.counters.successful.fetch_add(1, Ordering::Relaxed);
                let elapsed = fired_at.elapsed();
                let _ = self.event_tx.send(AutomationEvent::Completed {
                    rule_id: rule.id.clone(),
                    elapsed,
                });
                tracing::debug!(
                    "Rule '{}' completed in {:?} ({} variable(s) set)",
                    rule.name,
                    elapsed,
                    ctx.variables.len()
                );
                Ok(TriggerOutcome::Executed)
            }
            Err(e) => {
                let outcome = match e {
                    ActionError::TimedOut { .. } => ExecutionOutcome::TimedOut,
                    ActionError::StepFailed { .. } => ExecutionOutcome::Failed,
                };
                runtime.failure_count += 1;
                runtime.last_error = Some(e.to_string());
                self.push_history(
                    &mut runtime,
                    record(started_at, reason, outcome, Some(e.to_string()), attempts),
                );
                drop(runtime);

                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let _ = self.event_tx.send(AutomationEvent::Failed {
                    rule_id: rule.id.clone(),
                    error: e.to_string(),
                });
                Err(AutomationError::Action(e))
            }
        }
    }

    fn push_history(&self, runtime: &mut RuleRuntime, record: ExecutionRecord) {
        runtime.history.push_back(record);
        while runtime.history.len() > self.config.history_limit {
            runtime.history.pop_front();
        }
    }
}

impl Drop for AutomationEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for entry in self.rules.iter() {
            self.unregister_handler(&entry);
            entry.runtime().cancel_pending();
        }
    }
}

fn record(
    started_at: DateTime<Utc>,
    reason: FireReason,
    outcome: ExecutionOutcome,
    error: Option<String>,
    attempts: u32,
) -> ExecutionRecord {
    ExecutionRecord {
        started_at,
        finished_at: Utc::now(),
        reason: reason.to_string(),
        outcome,
        error,
        attempts,
    }
}

fn status_of(entry: &RuleEntry) -> RuleStatus {
    let runtime = entry.runtime();
    RuleStatus {
        id: entry.rule.id.clone(),
        name: entry.rule.name.clone(),
        description: entry.rule.description.clone(),
        trigger: entry.rule.trigger.kind(),
        state: runtime.state(Instant::now()),
        enabled: runtime.enabled,
        execution_count: runtime.execution_count,
        failure_count: runtime.failure_count,
        suppressed_count: runtime.suppressed_count,
        last_fired_at: runtime.last_fired_at,
        last_error: runtime.last_error.clone(),
        pending_fires: runtime.pending.len(),
        recent_executions: runtime.history.iter().cloned().collect(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
