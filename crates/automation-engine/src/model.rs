//! Data models for the automation engine

use crate::action::ActionPlan;
use crate::error::AutomationError;
use chrono::{DateTime, NaiveTime, Utc};
use cron::Schedule;
use event_bus::{always, EventPredicate};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use studio_events::{Event, EventType, TypeRegistry};

/// Unique rule identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Longest interval accepted for timer-driven triggers
pub const MAX_TIMER_INTERVAL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Polled check behind a condition trigger. An error counts as false.
pub type StateCheck = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;

/// What initiates a rule
#[derive(Clone)]
pub enum Trigger {
    /// Fire on every matching event
    Event {
        event_type: EventType,
        predicate: EventPredicate,
    },
    /// Fire `delay` after a matching event
    Delay {
        event_type: EventType,
        predicate: EventPredicate,
        delay: Duration,
    },
    /// Fire every `interval`, measured from when the timer starts
    Periodic { interval: Duration },
    /// Fire at a wall-clock `hour:minute` in local time
    AbsoluteTime {
        hour: u32,
        minute: u32,
        /// Reschedule for the next matching day after firing
        recurring: bool,
        /// Days of week (0=Sunday, 1=Monday, ..., 6=Saturday).
        /// Empty means every day
        days: Vec<u8>,
    },
    /// Cron expression (e.g., "0 30 9 * * *" for 9:30 AM daily)
    Cron { expression: String },
    /// Fire whenever `check` holds, polled every `check_interval`
    Condition {
        check: StateCheck,
        check_interval: Duration,
    },
    /// Only fires through an explicit trigger call
    Manual,
}

impl Trigger {
    #[must_use]
    pub fn event(event_type: EventType) -> Self {
        Self::Event {
            event_type,
            predicate: always(),
        }
    }

    pub fn event_when<F>(event_type: EventType, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::Event {
            event_type,
            predicate: std::sync::Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn delay(event_type: EventType, delay: Duration) -> Self {
        Self::Delay {
            event_type,
            predicate: always(),
            delay,
        }
    }

    pub fn delay_when<F>(event_type: EventType, delay: Duration, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::Delay {
            event_type,
            predicate: std::sync::Arc::new(predicate),
            delay,
        }
    }

    #[must_use]
    pub fn periodic(interval: Duration) -> Self {
        Self::Periodic { interval }
    }

    /// Every day at `hour:minute`
    #[must_use]
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self::AbsoluteTime {
            hour,
            minute,
            recurring: true,
            days: Vec::new(),
        }
    }

    /// Next occurrence of `hour:minute` only
    #[must_use]
    pub fn once_at(hour: u32, minute: u32) -> Self {
        Self::AbsoluteTime {
            hour,
            minute,
            recurring: false,
            days: Vec::new(),
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    /// Poll an async check every `check_interval`, firing while it holds
    pub fn condition<F, Fut, E>(check_interval: Duration, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let check: StateCheck = Arc::new(move || {
            let pending = check();
            Box::pin(async move { pending.await.map_err(|e| e.to_string()) })
        });
        Self::Condition {
            check,
            check_interval,
        }
    }

    /// Event type watched by event-driven triggers
    #[must_use]
    pub fn event_type(&self) -> Option<&EventType> {
        match self {
            Self::Event { event_type, .. } | Self::Delay { event_type, .. } => Some(event_type),
            _ => None,
        }
    }

    /// Whether the trigger is driven by the scheduler's timers
    #[must_use]
    pub fn is_timed(&self) -> bool {
        matches!(
            self,
            Self::Periodic { .. }
                | Self::AbsoluteTime { .. }
                | Self::Cron { .. }
                | Self::Condition { .. }
        )
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Delay { .. } => "delay",
            Self::Periodic { .. } => "periodic",
            Self::AbsoluteTime { .. } => "absolute_time",
            Self::Cron { .. } => "cron",
            Self::Condition { .. } => "condition",
            Self::Manual => "manual",
        }
    }

    fn validate(&self, registry: &TypeRegistry) -> Result<(), AutomationError> {
        match self {
            Self::Event { event_type, .. } | Self::Delay { event_type, .. } => registry
                .validate(event_type)
                .map_err(|e| AutomationError::Validation(e.to_string())),
            Self::Periodic { interval } => validate_interval("Periodic interval", *interval),
            Self::Condition { check_interval, .. } => {
                validate_interval("Condition check interval", *check_interval)
            }
            Self::AbsoluteTime {
                hour, minute, days, ..
            } => {
                if *hour > 23 {
                    return Err(AutomationError::Validation(format!(
                        "Hour must be in 0..=23, got {hour}"
                    )));
                }
                if *minute > 59 {
                    return Err(AutomationError::Validation(format!(
                        "Minute must be in 0..=59, got {minute}"
                    )));
                }
                validate_days(days)
            }
            Self::Cron { expression } => Schedule::from_str(expression)
                .map(|_| ())
                .map_err(|e| AutomationError::InvalidCron(format!("{expression}: {e}"))),
            Self::Manual => Ok(()),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event { event_type, .. } => f
                .debug_struct("Event")
                .field("event_type", event_type)
                .finish_non_exhaustive(),
            Self::Delay {
                event_type, delay, ..
            } => f
                .debug_struct("Delay")
                .field("event_type", event_type)
                .field("delay", delay)
                .finish_non_exhaustive(),
            Self::Periodic { interval } => f
                .debug_struct("Periodic")
                .field("interval", interval)
                .finish(),
            Self::AbsoluteTime {
                hour,
                minute,
                recurring,
                days,
            } => f
                .debug_struct("AbsoluteTime")
                .field("hour", hour)
                .field("minute", minute)
                .field("recurring", recurring)
                .field("days", days)
                .finish(),
            Self::Cron { expression } => f
                .debug_struct("Cron")
                .field("expression", expression)
                .finish(),
            Self::Condition { check_interval, .. } => f
                .debug_struct("Condition")
                .field("check_interval", check_interval)
                .finish_non_exhaustive(),
            Self::Manual => f.write_str("Manual"),
        }
    }
}

/// Conditions that must be true for the action to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Time range condition (action only runs within this window)
    TimeRange {
        /// Start time in HH:MM format
        start: String,
        /// End time in HH:MM format (can wrap past midnight)
        end: String,
    },
    /// Day of week condition
    DayOfWeek {
        /// Days when condition is true (0=Sunday)
        days: Vec<u8>,
    },
    /// Field of the triggering event's payload (camelCase name)
    EventField { field: String, equals: Value },
    /// Execution context variable
    Variable { name: String, equals: Value },
    /// Logical AND of multiple conditions
    And { conditions: Vec<Condition> },
    /// Logical OR of multiple conditions
    Or { conditions: Vec<Condition> },
    /// Negate a condition
    Not { condition: Box<Condition> },
}

impl Condition {
    pub(crate) fn validate(&self) -> Result<(), AutomationError> {
        match self {
            Self::TimeRange { start, end } => {
                parse_time(start)?;
                parse_time(end)?;
                Ok(())
            }
            Self::DayOfWeek { days } => validate_days(days),
            Self::EventField { field, .. } if field.is_empty() => Err(
                AutomationError::InvalidCondition("Event field name is empty".to_string()),
            ),
            Self::Variable { name, .. } if name.is_empty() => Err(
                AutomationError::InvalidCondition("Variable name is empty".to_string()),
            ),
            Self::EventField { .. } | Self::Variable { .. } => Ok(()),
            Self::And { conditions } | Self::Or { conditions } => {
                conditions.iter().try_for_each(Self::validate)
            }
            Self::Not { condition } => condition.validate(),
        }
    }
}

/// Parse a time string in HH:MM format
pub(crate) fn parse_time(s: &str) -> Result<NaiveTime, AutomationError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| AutomationError::InvalidTimeFormat(s.to_string()))
}

fn validate_interval(what: &str, interval: Duration) -> Result<(), AutomationError> {
    if interval.is_zero() {
        return Err(AutomationError::Validation(format!(
            "{what} must be greater than zero"
        )));
    }
    if interval > MAX_TIMER_INTERVAL {
        return Err(AutomationError::Validation(format!(
            "{what} must be at most {MAX_TIMER_INTERVAL:?}, got {interval:?}"
        )));
    }
    Ok(())
}

fn validate_days(days: &[u8]) -> Result<(), AutomationError> {
    match days.iter().find(|d| **d > 6) {
        Some(day) => Err(AutomationError::Validation(format!(
            "Day of week must be in 0..=6, got {day}"
        ))),
        None => Ok(()),
    }
}

/// What happens when a delay rule matches again while a fire is pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayPolicy {
    /// Keep the pending fire and ignore the new match
    #[default]
    Debounce,
    /// Schedule an additional pending fire
    Overlap,
}

/// Opt-in retry of failed action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

/// Log levels for log steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A complete automation rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    /// Human-readable name
    pub name: String,
    pub description: Option<String>,
    pub trigger: Trigger,
    /// Checked before every run; all must pass
    pub conditions: Vec<Condition>,
    pub action: ActionPlan,
    /// Minimum time between the start of a successful run and the next run
    pub cooldown: Duration,
    /// Handler priority on the event bus for event-driven triggers
    pub priority: i32,
    pub delay_policy: DelayPolicy,
    /// Stop firing after this many successful runs
    pub max_executions: Option<u64>,
    pub retry: Option<RetryPolicy>,
    /// Overrides the engine's action timeout
    pub timeout: Option<Duration>,
    /// Initial enabled state
    pub enabled: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>, trigger: Trigger, action: ActionPlan) -> Self {
        Self {
            id: RuleId::generate(),
            name: name.into(),
            description: None,
            trigger,
            conditions: Vec::new(),
            action,
            cooldown: Duration::ZERO,
            priority: 0,
            delay_policy: DelayPolicy::default(),
            max_executions: None,
            retry: None,
            timeout: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<RuleId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_delay_policy(mut self, policy: DelayPolicy) -> Self {
        self.delay_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_executions(mut self, max: u64) -> Self {
        self.max_executions = Some(max);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry = Some(RetryPolicy { attempts, backoff });
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register the rule in the disabled state
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check the rule specification before registration
    pub fn validate(&self, registry: &TypeRegistry) -> Result<(), AutomationError> {
        if self.name.trim().is_empty() {
            return Err(AutomationError::Validation(
                "Rule name must not be empty".to_string(),
            ));
        }
        if self.max_executions == Some(0) {
            return Err(AutomationError::Validation(
                "max_executions must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(AutomationError::Validation(
                "Action timeout must be greater than zero".to_string(),
            ));
        }
        self.trigger.validate(registry)?;
        self.conditions.iter().try_for_each(Condition::validate)
    }
}

/// Run state of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Idle,
    /// A delayed fire is pending
    Scheduled,
    Running,
    Cooldown,
    Disabled,
}

/// Result of one run attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failed,
    TimedOut,
    ConditionsNotMet,
}

/// Diagnostic record of one run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// What fired the rule
    pub reason: String,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Result of a manual trigger call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Executed,
    ConditionsNotMet,
    /// Cooldown, an in-flight run or the execution limit prevented the run
    Suppressed,
}

/// Queryable rule diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub id: RuleId,
    pub name: String,
    pub description: Option<String>,
    pub trigger: &'static str,
    pub state: RuleState,
    pub enabled: bool,
    pub execution_count: u64,
    pub failure_count: u64,
    pub suppressed_count: u64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_fires: usize,
    pub recent_executions: Vec<ExecutionRecord>,
}

/// Engine-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub rules: usize,
    pub enabled_rules: usize,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub suppressed: u64,
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default bound on one action run in milliseconds
    pub action_timeout_ms: u64,
    /// Capacity of the timer fire queue
    pub fire_queue_capacity: usize,
    /// Execution records kept per rule
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: 300_000,
            fire_queue_capacity: 64,
            history_limit: 10,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}
