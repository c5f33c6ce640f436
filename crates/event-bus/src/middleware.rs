//! Middleware pipeline around handler dispatch
//!
//! Each stage receives the dispatch context and a [`Next`] continuation.
//! Calling `next.run(ctx)` invokes the remaining stages and then the
//! handlers; not calling it vetoes dispatch for this event.

use crate::error::HandlerError;
use crate::handler::{EventHandler, EventPredicate, HandlerEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use studio_events::{Event, EventPriority, EventType};
use tokio::time::Instant;
use uuid::Uuid;

/// A stage of the dispatch pipeline
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name reported when this stage vetoes an event
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>);
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub event_id: Uuid,
    pub event_type: EventType,
    /// Handlers whose type and predicate matched
    pub matched: usize,
    /// Handlers actually invoked
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
    /// Handlers cancelled by the per-handler timeout
    pub timed_out: usize,
    /// Handlers unregistered after matching
    pub skipped: usize,
    /// Stage that stopped dispatch, if any
    pub vetoed_by: Option<String>,
    /// Observations attached by middleware stages
    pub annotations: HashMap<String, Value>,
    pub elapsed: Duration,
}

impl DispatchReport {
    #[must_use]
    pub fn is_vetoed(&self) -> bool {
        self.vetoed_by.is_some()
    }
}

/// State carried through the pipeline for a single event
pub struct DispatchContext {
    event: Arc<Event>,
    handlers: Vec<Arc<HandlerEntry>>,
    annotations: HashMap<String, Value>,
    handler_timeout: Duration,
    deepest_stage: Option<usize>,
    reached_handlers: bool,
    report: DispatchReport,
}

impl DispatchContext {
    pub(crate) fn new(
        event: Arc<Event>,
        handlers: Vec<Arc<HandlerEntry>>,
        handler_timeout: Duration,
    ) -> Self {
        let report = DispatchReport {
            event_id: event.id(),
            event_type: event.event_type(),
            matched: handlers.len(),
            invoked: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            vetoed_by: None,
            annotations: HashMap::new(),
            elapsed: Duration::ZERO,
        };
        Self {
            event,
            handlers,
            annotations: HashMap::new(),
            handler_timeout,
            deepest_stage: None,
            reached_handlers: false,
            report,
        }
    }

    #[must_use]
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Matched handlers in invocation order
    #[must_use]
    pub fn handlers(&self) -> &[Arc<HandlerEntry>] {
        &self.handlers
    }

    /// Attach an observation to this dispatch pass
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.annotations.insert(key.into(), value);
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    #[must_use]
    pub fn report(&self) -> &DispatchReport {
        &self.report
    }

    pub(crate) fn finish(
        mut self,
        stages: &[Arc<dyn Middleware>],
        elapsed: Duration,
    ) -> DispatchReport {
        if !self.reached_handlers {
            self.report.vetoed_by = Some(
                self.deepest_stage
                    .and_then(|i| stages.get(i))
                    .map_or_else(|| "pipeline".to_string(), |s| s.name().to_string()),
            );
        }
        self.report.annotations = self.annotations;
        self.report.elapsed = elapsed;
        self.report
    }
}

/// Continuation invoking the remaining stages and then the handlers
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    index: usize,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Middleware>]) -> Self {
        Self { stages, index: 0 }
    }

    pub async fn run(self, ctx: &mut DispatchContext) {
        match self.stages.get(self.index) {
            Some(stage) => {
                ctx.deepest_stage = Some(self.index);
                let next = Next {
                    stages: self.stages,
                    index: self.index + 1,
                };
                stage.handle(ctx, next).await;
            }
            None => {
                ctx.reached_handlers = true;
                invoke_handlers(ctx).await;
            }
        }
    }
}

/// Invoke matched handlers one after another, each on its own task
async fn invoke_handlers(ctx: &mut DispatchContext) {
    let handlers = ctx.handlers.clone();
    for entry in handlers {
        if !entry.is_active() {
            ctx.report.skipped += 1;
            continue;
        }

        let result = invoke_one(&ctx.event, Arc::clone(&entry.handler), ctx.handler_timeout).await;
        ctx.report.invoked += 1;

        if let Err(e) = result {
            if matches!(e, HandlerError::TimedOut(_)) {
                ctx.report.timed_out += 1;
            } else {
                ctx.report.failed += 1;
            }
            tracing::error!(
                "Handler {} failed for {} event: {}",
                entry.id,
                ctx.event.event_type(),
                e
            );
        }
    }
}

async fn invoke_one(
    event: &Arc<Event>,
    handler: Arc<dyn EventHandler>,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let event = Arc::clone(event);
    let task = tokio::spawn(async move { handler.handle(event).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) if e.is_panic() => Err(HandlerError::Panicked),
        Ok(Err(_)) => Err(HandlerError::failed("handler task cancelled")),
        Err(_) => {
            abort.abort();
            Err(HandlerError::TimedOut(timeout))
        }
    }
}

/// Logs every dispatched event
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) {
        let event = Arc::clone(ctx.event());
        let replay = if event.is_replayed() { " (replay)" } else { "" };

        if event.priority() >= EventPriority::High {
            tracing::info!(
                "Event {}{} -> {} handler(s)",
                event.event_type(),
                replay,
                ctx.handlers().len()
            );
        } else {
            tracing::debug!(
                "Event {}{} -> {} handler(s)",
                event.event_type(),
                replay,
                ctx.handlers().len()
            );
        }

        next.run(ctx).await;

        let report = ctx.report();
        tracing::debug!(
            "Event {} dispatched: {} invoked, {} failed, {} timed out",
            event.event_type(),
            report.invoked,
            report.failed,
            report.timed_out
        );
    }
}

/// Measures dispatch latency and warns about slow passes
#[derive(Debug)]
pub struct TimingMiddleware {
    threshold: Duration,
}

impl TimingMiddleware {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Middleware for TimingMiddleware {
    fn name(&self) -> &str {
        "timing"
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) {
        let started = Instant::now();
        next.run(ctx).await;
        let elapsed = started.elapsed();

        ctx.annotate(
            "dispatch_latency_ms",
            Value::from(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
        );
        if elapsed > self.threshold {
            tracing::warn!(
                "Slow dispatch for {}: {:.3}s",
                ctx.event().event_type(),
                elapsed.as_secs_f64()
            );
        }
    }
}

/// Vetoes events rejected by a predicate
pub struct GateMiddleware {
    name: String,
    allow: EventPredicate,
}

impl GateMiddleware {
    pub fn new(name: impl Into<String>, allow: EventPredicate) -> Self {
        Self {
            name: name.into(),
            allow,
        }
    }

    /// Drop events re-emitted by the replayer
    #[must_use]
    pub fn skip_replayed() -> Self {
        Self::new("skip-replayed", Arc::new(|event: &Event| !event.is_replayed()))
    }
}

#[async_trait]
impl Middleware for GateMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut DispatchContext, next: Next<'_>) {
        if (self.allow)(ctx.event()) {
            next.run(ctx).await;
        } else {
            tracing::debug!("{} vetoed {} event", self.name, ctx.event().event_type());
        }
    }
}
