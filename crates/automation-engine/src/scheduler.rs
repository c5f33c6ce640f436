//! Scheduler for time-based rule triggers

use crate::error::AutomationError;
use crate::model::{Rule, RuleId, StateCheck, Trigger};
use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDateTime, NaiveTime, TimeZone};
use cron::Schedule;
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use studio_events::Event;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What caused a rule to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    Event,
    Delay,
    Periodic,
    Schedule,
    Cron,
    Condition,
    Manual,
}

impl fmt::Display for FireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Event => "event",
            Self::Delay => "delay",
            Self::Periodic => "periodic",
            Self::Schedule => "schedule",
            Self::Cron => "cron",
            Self::Condition => "condition",
            Self::Manual => "manual",
        })
    }
}

/// Request to run a rule, delivered to the engine's fire loop
#[derive(Debug, Clone)]
pub struct FireRequest {
    pub rule_id: RuleId,
    pub reason: FireReason,
    pub trigger_event: Option<Arc<Event>>,
    /// Identifies the pending delayed fire this request completes
    pub pending_token: Option<u64>,
}

impl FireRequest {
    fn timer(rule_id: RuleId, reason: FireReason) -> Self {
        Self {
            rule_id,
            reason,
            trigger_event: None,
            pending_token: None,
        }
    }
}

/// Scheduler for managing time-based rule triggers
pub struct Scheduler {
    /// Active timer handles (keyed by rule ID)
    timers: DashMap<RuleId, JoinHandle<()>>,
    fire_tx: mpsc::Sender<FireRequest>,
}

impl Scheduler {
    /// Create a scheduler delivering fires into `fire_tx`
    #[must_use]
    pub fn new(fire_tx: mpsc::Sender<FireRequest>) -> Self {
        Self {
            timers: DashMap::new(),
            fire_tx,
        }
    }

    /// Start the timer for a rule with a timed trigger
    pub fn register(&self, rule: &Rule) -> Result<(), AutomationError> {
        // Replace any existing timer
        self.remove(&rule.id);

        match &rule.trigger {
            Trigger::Periodic { interval } => {
                self.schedule_periodic(&rule.id, *interval)?;
            }
            Trigger::AbsoluteTime {
                hour,
                minute,
                recurring,
                days,
            } => {
                self.schedule_absolute(&rule.id, *hour, *minute, *recurring, days)?;
            }
            Trigger::Cron { expression } => {
                self.schedule_cron(&rule.id, expression)?;
            }
            Trigger::Condition {
                check,
                check_interval,
            } => {
                self.schedule_condition(&rule.id, Arc::clone(check), *check_interval)?;
            }
            _ => {} // Not a timed trigger, nothing to do
        }

        Ok(())
    }

    /// Remove a rule's timer
    pub fn remove(&self, rule_id: &RuleId) {
        if let Some((_, handle)) = self.timers.remove(rule_id) {
            handle.abort();
            tracing::debug!("Removed scheduler timer for rule {}", rule_id);
        }
    }

    /// Abort every timer
    pub fn clear(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }

    /// Schedule a fixed-interval trigger measured from now
    fn schedule_periodic(&self, rule_id: &RuleId, interval: Duration) -> Result<(), AutomationError> {
        let first_tick = checked_start(Instant::now(), interval)?;
        let id = rule_id.clone();
        let fire_tx = self.fire_tx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                tracing::debug!("Periodic trigger fired for rule {}", id);
                if !deliver(&fire_tx, FireRequest::timer(id.clone(), FireReason::Periodic)) {
                    break;
                }
            }
        });

        self.timers.insert(rule_id.clone(), handle);
        tracing::info!(
            "Scheduled periodic trigger every {:?} for rule {}",
            interval,
            rule_id
        );
        Ok(())
    }

    /// Poll a state check, firing on every check that holds
    fn schedule_condition(
        &self,
        rule_id: &RuleId,
        check: StateCheck,
        check_interval: Duration,
    ) -> Result<(), AutomationError> {
        // First check runs immediately
        checked_start(Instant::now(), check_interval)?;
        let id = rule_id.clone();
        let fire_tx = self.fire_tx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let holds = match check().await {
                    Ok(holds) => holds,
                    Err(e) => {
                        tracing::error!("Error evaluating condition trigger of rule {}: {}", id, e);
                        false
                    }
                };
                if holds {
                    tracing::debug!("Condition trigger fired for rule {}", id);
                    if !deliver(&fire_tx, FireRequest::timer(id.clone(), FireReason::Condition)) {
                        break;
                    }
                }
            }
        });

        self.timers.insert(rule_id.clone(), handle);
        tracing::info!(
            "Scheduled condition trigger every {:?} for rule {}",
            check_interval,
            rule_id
        );
        Ok(())
    }

    /// Schedule a wall-clock trigger
    fn schedule_absolute(
        &self,
        rule_id: &RuleId,
        hour: u32,
        minute: u32,
        recurring: bool,
        days: &[u8],
    ) -> Result<(), AutomationError> {
        let target_time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| AutomationError::InvalidTimeFormat(format!("{hour:02}:{minute:02}")))?;

        let id = rule_id.clone();
        let fire_tx = self.fire_tx.clone();
        let days_filter = days.to_vec();

        let handle = tokio::spawn(async move {
            let mut after = Local::now();
            loop {
                let Some(next) = next_occurrence(&after, target_time, &days_filter) else {
                    tracing::warn!("No upcoming time for absolute trigger of rule {}", id);
                    break;
                };

                let duration = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!(
                    "Next time trigger for {} at {} (in {:?})",
                    id,
                    next,
                    duration
                );

                tokio::time::sleep(duration).await;

                tracing::debug!("Time trigger fired for rule {}", id);
                if !deliver(&fire_tx, FireRequest::timer(id.clone(), FireReason::Schedule))
                    || !recurring
                {
                    break;
                }
                after = next;
            }
        });

        self.timers.insert(rule_id.clone(), handle);
        tracing::info!(
            "Scheduled time trigger at {:02}:{:02} (days: {:?}, recurring: {}) for rule {}",
            hour,
            minute,
            days,
            recurring,
            rule_id
        );
        Ok(())
    }

    /// Schedule a cron-based trigger
    fn schedule_cron(&self, rule_id: &RuleId, expression: &str) -> Result<(), AutomationError> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| AutomationError::InvalidCron(format!("{expression}: {e}")))?;

        let id = rule_id.clone();
        let fire_tx = self.fire_tx.clone();

        let handle = tokio::spawn(async move {
            let mut after = Local::now();
            loop {
                let Some(next) = schedule.after(&after).next() else {
                    tracing::warn!("No upcoming times for cron schedule {}", id);
                    break;
                };

                let duration = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!("Next cron trigger for {} at {} (in {:?})", id, next, duration);

                tokio::time::sleep(duration).await;

                tracing::debug!("Cron trigger fired for rule {}", id);
                if !deliver(&fire_tx, FireRequest::timer(id.clone(), FireReason::Cron)) {
                    break;
                }
                after = next;
            }
        });

        self.timers.insert(rule_id.clone(), handle);
        tracing::info!(
            "Scheduled cron trigger '{}' for rule {}",
            expression,
            rule_id
        );
        Ok(())
    }

    /// Get the number of active timers
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Abort all timer tasks
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}

/// First tick of an interval timer, rejecting periods the clock cannot represent
fn checked_start(now: Instant, interval: Duration) -> Result<Instant, AutomationError> {
    if interval.is_zero() {
        return Err(AutomationError::Validation(
            "Timer interval must be greater than zero".to_string(),
        ));
    }
    now.checked_add(interval)
        .and_then(|first| first.checked_add(interval).map(|_| first))
        .ok_or_else(|| {
            AutomationError::Validation(format!("Timer interval {interval:?} is out of range"))
        })
}

/// Hand a timer fire to the engine. A full queue skips the tick.
/// Returns `false` once the engine is gone.
fn deliver(fire_tx: &mpsc::Sender<FireRequest>, request: FireRequest) -> bool {
    match fire_tx.try_send(request) {
        Ok(()) => true,
        Err(TrySendError::Full(request)) => {
            tracing::warn!(
                "Fire queue full, skipping {} tick of rule {}",
                request.reason,
                request.rule_id
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Next wall-clock occurrence of `time` strictly after `after`
///
/// Days are numbered from Sunday (0). Local times that do not exist move
/// forward to the first valid minute; repeated local times use the
/// earlier instant.
pub fn next_occurrence<Tz: TimeZone>(
    after: &DateTime<Tz>,
    time: NaiveTime,
    days: &[u8],
) -> Option<DateTime<Tz>> {
    let tz = after.timezone();
    let mut date = after.date_naive();

    for _ in 0..=8 {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        if days.is_empty() || days.contains(&weekday) {
            if let Some(candidate) = resolve_local(&tz, date.and_time(time)) {
                if candidate > *after {
                    return Some(candidate);
                }
            }
        }
        date = date.succ_opt()?;
    }
    None
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut local = local;
    // Transitions never skip more than a few hours
    for _ in 0..=240 {
        match tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => local += chrono::Duration::minutes(1),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionPlan;
    use chrono::{FixedOffset, NaiveDate, Timelike, Utc};
    use chrono_tz::Europe::Berlin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_next_occurrence_same_day_and_next_day() {
        // 2024-06-05 is a Wednesday
        let morning = utc(2024, 6, 5, 8, 0);
        assert_eq!(
            next_occurrence(&morning, hm(9, 30), &[]),
            Some(utc(2024, 6, 5, 9, 30))
        );

        let late = utc(2024, 6, 5, 10, 0);
        assert_eq!(
            next_occurrence(&late, hm(9, 30), &[]),
            Some(utc(2024, 6, 6, 9, 30))
        );

        // Exactly at the target moves on to the next day
        let exact = utc(2024, 6, 5, 9, 30);
        assert_eq!(
            next_occurrence(&exact, hm(9, 30), &[]),
            Some(utc(2024, 6, 6, 9, 30))
        );
    }

    #[test]
    fn test_next_occurrence_weekday_filter() {
        let wednesday = utc(2024, 6, 5, 12, 0);
        assert_eq!(
            next_occurrence(&wednesday, hm(18, 0), &[0]),
            Some(utc(2024, 6, 9, 18, 0))
        );
        // Same weekday, already passed: one week later
        assert_eq!(
            next_occurrence(&wednesday, hm(9, 0), &[3]),
            Some(utc(2024, 6, 12, 9, 0))
        );
    }

    #[test]
    fn test_next_occurrence_uses_local_wall_clock() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let after = tz.with_ymd_and_hms(2024, 6, 5, 23, 0, 0).unwrap();
        let next = next_occurrence(&after, hm(1, 0), &[]).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2024, 6, 6, 1, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), utc(2024, 6, 5, 23, 0));
    }

    fn periodic_rule(interval: Duration) -> Rule {
        Rule::new("tick", Trigger::periodic(interval), ActionPlan::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_every_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let rule = periodic_rule(Duration::from_secs(30));
        scheduler.register(&rule).unwrap();
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(95)).await;

        let mut fired = 0;
        while let Ok(request) = rx.try_recv() {
            assert_eq!(request.rule_id, rule.id);
            assert_eq!(request.reason, FireReason::Periodic);
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_timer() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let rule = periodic_rule(Duration::from_secs(10));
        scheduler.register(&rule).unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.remove(&rule.id);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_next_occurrence_spring_forward_gap() {
        // 2024-03-31 02:00 CET jumps to 03:00 CEST
        let after = Berlin.with_ymd_and_hms(2024, 3, 31, 1, 0, 0).unwrap();
        let next = next_occurrence(&after, hm(2, 30), &[]).unwrap();
        assert_eq!(next, Berlin.with_ymd_and_hms(2024, 3, 31, 3, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), utc(2024, 3, 31, 1, 0));

        // The following day is back to the requested wall-clock time
        let following = next_occurrence(&next, hm(2, 30), &[]).unwrap();
        assert_eq!(
            following,
            Berlin.with_ymd_and_hms(2024, 4, 1, 2, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_next_occurrence_fall_back_takes_earlier_instant() {
        // 2024-10-27 03:00 CEST falls back to 02:00 CET, so 02:30 happens twice
        let after = Berlin.with_ymd_and_hms(2024, 10, 27, 1, 0, 0).unwrap();
        let next = next_occurrence(&after, hm(2, 30), &[]).unwrap();
        assert_eq!(next.with_timezone(&Utc), utc(2024, 10, 27, 0, 30));

        // The repeated 02:30 does not fire a second time that day
        let following = next_occurrence(&next, hm(2, 30), &[]).unwrap();
        assert_eq!(
            following,
            Berlin.with_ymd_and_hms(2024, 10, 28, 2, 30, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_at_fires_a_single_time() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let target = Local::now() + chrono::Duration::hours(2);
        let rule = Rule::new(
            "once",
            Trigger::once_at(target.hour(), target.minute()),
            ActionPlan::default(),
        );
        scheduler.register(&rule).unwrap();

        tokio::time::sleep(Duration::from_secs(30 * 3600)).await;

        let request = rx.try_recv().unwrap();
        assert_eq!(request.rule_id, rule.id);
        assert_eq!(request.reason, FireReason::Schedule);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_interval_out_of_range() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let rule = periodic_rule(Duration::MAX);
        assert!(matches!(
            scheduler.register(&rule),
            Err(AutomationError::Validation(_))
        ));
        assert_eq!(scheduler.active_count(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
    }

    fn polled_trigger(
        ready: &Arc<AtomicBool>,
        polls: &Arc<AtomicUsize>,
        fail: bool,
    ) -> Trigger {
        let ready = Arc::clone(ready);
        let polls = Arc::clone(polls);
        Trigger::condition(Duration::from_secs(1), move || {
            let ready = Arc::clone(&ready);
            let polls = Arc::clone(&polls);
            async move {
                polls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    return Err("controller offline".to_string());
                }
                Ok(ready.load(Ordering::SeqCst))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_trigger_fires_while_check_holds() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let ready = Arc::new(AtomicBool::new(false));
        let polls = Arc::new(AtomicUsize::new(0));
        let rule = Rule::new(
            "when ready",
            polled_trigger(&ready, &polls, false),
            ActionPlan::default(),
        );
        scheduler.register(&rule).unwrap();

        // Checks at 0s, 1s and 2s all fail
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());

        // Checks at 3s, 4s and 5s hold
        ready.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut fired = 0;
        while let Ok(request) = rx.try_recv() {
            assert_eq!(request.reason, FireReason::Condition);
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_check_error_counts_as_false() {
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = Scheduler::new(tx);
        let ready = Arc::new(AtomicBool::new(true));
        let polls = Arc::new(AtomicUsize::new(0));
        let rule = Rule::new(
            "flaky check",
            polled_trigger(&ready, &polls, true),
            ActionPlan::default(),
        );
        scheduler.register(&rule).unwrap();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 5);
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.active_count(), 1);
    }

    #[tokio::test]
    async fn test_non_timed_triggers_are_ignored() {
        let (tx, _rx) = mpsc::channel(1);
        let scheduler = Scheduler::new(tx);
        let rule = Rule::new("manual", Trigger::Manual, ActionPlan::default());
        scheduler.register(&rule).unwrap();
        assert_eq!(scheduler.active_count(), 0);

        let cron = Rule::new("bad", Trigger::cron("nope"), ActionPlan::default());
        assert!(matches!(
            scheduler.register(&cron),
            Err(AutomationError::InvalidCron(_))
        ));
    }
}
