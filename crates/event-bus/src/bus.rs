//! Event bus: handler registry, bounded queue and dispatch workers

use crate::error::BusError;
use crate::handler::{always, EventHandler, EventPredicate, HandlerEntry, HandlerId};
use crate::middleware::{DispatchContext, DispatchReport, Middleware, Next};
use crate::recorder::{lock, Recorder, Recording, ReplayReport};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use studio_events::{Event, EventType, TypeRegistry};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bus tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of queued events before `emit` overflows
    pub queue_capacity: usize,
    /// Number of dispatch workers pulling from the queue
    pub workers: usize,
    /// Per-handler invocation timeout in milliseconds
    pub handler_timeout_ms: u64,
    /// Dispatch passes slower than this are reported by the timing stage
    pub slow_dispatch_threshold_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 1,
            handler_timeout_ms: 30_000,
            slow_dispatch_threshold_ms: 100,
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    #[must_use]
    pub fn slow_dispatch_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_dispatch_threshold_ms)
    }
}

/// Snapshot of bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub emitted: u64,
    pub dispatched: u64,
    pub overflowed: u64,
    pub handler_failures: u64,
    pub vetoed: u64,
}

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    dispatched: AtomicU64,
    overflowed: AtomicU64,
    handler_failures: AtomicU64,
    vetoed: AtomicU64,
}

/// Routes events to registered handlers through the middleware pipeline
pub struct EventBus {
    config: BusConfig,
    registry: Arc<TypeRegistry>,
    handlers: DashMap<HandlerId, Arc<HandlerEntry>>,
    next_handler_id: AtomicU64,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    queue_tx: mpsc::Sender<Arc<Event>>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    recorder: Recorder,
    counters: Counters,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl EventBus {
    /// Create a bus with its own type registry
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::new()))
    }

    /// Create a bus sharing an existing type registry
    #[must_use]
    pub fn with_registry(config: BusConfig, registry: Arc<TypeRegistry>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            registry,
            handlers: DashMap::new(),
            next_handler_id: AtomicU64::new(1),
            middleware: RwLock::new(Vec::new()),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            recorder: Recorder::default(),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Append a middleware stage. Stages run in installation order.
    pub fn use_middleware(&self, stage: Arc<dyn Middleware>) {
        tracing::debug!("Added middleware: {}", stage.name());
        self.middleware
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(stage);
    }

    /// Register a handler for an event type
    pub fn register(
        &self,
        event_type: EventType,
        predicate: EventPredicate,
        priority: i32,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, BusError> {
        self.registry
            .validate(&event_type)
            .map_err(|e| BusError::Validation(e.to_string()))?;

        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            "Registered {} for {} (priority {})",
            id,
            event_type,
            priority
        );
        self.handlers.insert(
            id,
            Arc::new(HandlerEntry::new(id, event_type, predicate, priority, handler)),
        );
        Ok(id)
    }

    /// Register an unfiltered handler with default priority
    pub fn on(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<HandlerId, BusError> {
        self.register(event_type, always(), 0, handler)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        match self.handlers.remove(&id) {
            Some((_, entry)) => {
                entry.deactivate();
                tracing::debug!("Unregistered {}", id);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Queue an event for dispatch without waiting
    pub fn emit(&self, event: Event) -> Result<(), BusError> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::Closed);
        }
        self.registry
            .validate(&event.event_type())
            .map_err(|e| BusError::Validation(e.to_string()))?;

        let event = Arc::new(event);
        match self.queue_tx.try_send(Arc::clone(&event)) {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                self.recorder.record(&event);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Event queue full, rejected {} event",
                    event.event_type()
                );
                Err(BusError::Overflow {
                    capacity: self.config.queue_capacity.max(1),
                })
            }
            Err(TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Dispatch one event through the pipeline and wait for its handlers
    pub async fn dispatch(&self, event: Arc<Event>) -> DispatchReport {
        let started = Instant::now();

        // Snapshot first: predicates may call back into the registry
        let candidates: Vec<Arc<HandlerEntry>> =
            self.handlers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut matched: Vec<Arc<HandlerEntry>> = candidates
            .into_iter()
            .filter(|entry| entry.matches(&event))
            .collect();
        matched.sort_by_key(|entry| (Reverse(entry.priority), entry.id));

        let stages: Vec<Arc<dyn Middleware>> = self
            .middleware
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        let mut ctx = DispatchContext::new(event, matched, self.config.handler_timeout());
        Next::new(&stages).run(&mut ctx).await;
        let report = ctx.finish(&stages, started.elapsed());

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        self.counters
            .handler_failures
            .fetch_add((report.failed + report.timed_out) as u64, Ordering::Relaxed);
        if let Some(stage) = &report.vetoed_by {
            self.counters.vetoed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Dispatch of {} vetoed by {}", report.event_type, stage);
        }
        report
    }

    /// Start the dispatch workers
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let count = self.config.workers.max(1);
        let mut workers = lock(&self.workers);
        for index in 0..count {
            let bus = Arc::clone(self);
            workers.push(tokio::spawn(bus.worker_loop(index)));
        }
        tracing::info!(
            "Event bus started with {} worker(s), queue capacity {}",
            count,
            self.config.queue_capacity
        );
    }

    /// Stop the workers and wait for in-progress dispatch to finish
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Dispatch worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Event bus stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    async fn worker_loop(self: Arc<Self>, index: usize) {
        loop {
            let next = {
                let mut rx = tokio::select! {
                    () = self.shutdown.cancelled() => break,
                    rx = self.queue_rx.lock() => rx,
                };
                tokio::select! {
                    () = self.shutdown.cancelled() => break,
                    event = rx.recv() => event,
                }
            };

            match next {
                Some(event) => {
                    self.dispatch(event).await;
                }
                None => break,
            }
        }
        tracing::debug!("Dispatch worker {} shutting down", index);
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            overflowed: self.counters.overflowed.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            vetoed: self.counters.vetoed.load(Ordering::Relaxed),
        }
    }

    /// Arm capture of every successfully emitted event
    pub fn start_recording(&self) {
        self.recorder.start();
    }

    /// Disarm capture and return what was recorded
    pub fn stop_recording(&self) -> Result<Recording, BusError> {
        self.recorder.stop().ok_or(BusError::NotRecording)
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recorder.is_armed()
    }

    /// Re-emit a recording, spacing events by `offset / speed`
    pub async fn replay(&self, recording: &Recording, speed: f64) -> Result<ReplayReport, BusError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(BusError::Validation(format!(
                "Replay speed must be positive, got {speed}"
            )));
        }

        tracing::info!(
            "Replaying {} events at {}x speed",
            recording.len(),
            speed
        );

        let started = Instant::now();
        let mut report = ReplayReport::default();

        for recorded in recording.events() {
            let delay = Duration::try_from_secs_f64(recorded.offset.as_secs_f64() / speed)
                .map_err(|e| BusError::Validation(format!("Replay offset out of range: {e}")))?;
            let due = started
                .checked_add(delay)
                .ok_or_else(|| BusError::Validation("Replay offset out of range".to_string()))?;
            tokio::time::sleep_until(due).await;

            match self.emit(recorded.event.replayed(recorded.offset)) {
                Ok(()) => report.emitted += 1,
                Err(BusError::Overflow { .. }) => {
                    report.dropped += 1;
                    tracing::warn!(
                        "Replay dropped {} event at {:?}: queue full",
                        recorded.event.event_type(),
                        recorded.offset
                    );
                }
                Err(e) => return Err(e),
            }
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            "Replay finished: {} emitted, {} dropped in {:?}",
            report.emitted,
            report.dropped,
            report.elapsed
        );
        Ok(report)
    }

    /// Replay on a background task
    pub fn spawn_replay(
        self: &Arc<Self>,
        recording: Recording,
        speed: f64,
    ) -> JoinHandle<Result<ReplayReport, BusError>> {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.replay(&recording, speed).await })
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for worker in lock(&self.workers).iter() {
            worker.abort();
        }
    }
}
