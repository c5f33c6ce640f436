//! Condition evaluator for rules and branch steps

use crate::action::ExecutionContext;
use crate::error::AutomationError;
use crate::model::{parse_time, Condition};
use chrono::{Datelike, Local, NaiveDateTime};
use serde_json::Value;

/// Evaluator for rule conditions
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all conditions (all must pass for AND semantics)
    pub fn evaluate_all(
        &self,
        conditions: &[Condition],
        ctx: &ExecutionContext,
    ) -> Result<bool, AutomationError> {
        let now = Local::now().naive_local();
        for condition in conditions {
            if !self.evaluate_at(condition, ctx, now)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a single condition against the local clock
    pub fn evaluate(
        &self,
        condition: &Condition,
        ctx: &ExecutionContext,
    ) -> Result<bool, AutomationError> {
        self.evaluate_at(condition, ctx, Local::now().naive_local())
    }

    /// Evaluate a single condition at a given local time
    pub fn evaluate_at(
        &self,
        condition: &Condition,
        ctx: &ExecutionContext,
        now: NaiveDateTime,
    ) -> Result<bool, AutomationError> {
        match condition {
            Condition::TimeRange { start, end } => evaluate_time_range(start, end, now),
            Condition::DayOfWeek { days } => Ok(evaluate_day_of_week(days, now)),
            Condition::EventField { field, equals } => Ok(ctx
                .trigger_event
                .as_ref()
                .and_then(|event| event.payload().field(field))
                .is_some_and(|value| value == *equals)),
            Condition::Variable { name, equals } => {
                Ok(ctx.variable(name).unwrap_or(&Value::Null) == equals)
            }
            Condition::And { conditions } => {
                for c in conditions {
                    if !self.evaluate_at(c, ctx, now)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or { conditions } => {
                for c in conditions {
                    if self.evaluate_at(c, ctx, now)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { condition } => Ok(!self.evaluate_at(condition, ctx, now)?),
        }
    }
}

fn evaluate_time_range(start: &str, end: &str, now: NaiveDateTime) -> Result<bool, AutomationError> {
    let start_time = parse_time(start)?;
    let end_time = parse_time(end)?;
    let now = now.time();

    // Handle wrap-around (e.g., 22:00 to 06:00)
    let in_range = if start_time <= end_time {
        now >= start_time && now <= end_time
    } else {
        now >= start_time || now <= end_time
    };

    Ok(in_range)
}

fn evaluate_day_of_week(days: &[u8], now: NaiveDateTime) -> bool {
    if days.is_empty() {
        return true; // Empty means every day
    }

    let today = now.weekday().num_days_from_sunday() as u8;
    days.contains(&today)
}
