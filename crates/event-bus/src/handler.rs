//! Handler registrations

use crate::error::HandlerError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use studio_events::{Event, EventType};

/// Predicate deciding whether a handler sees an event
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Predicate matching every event
#[must_use]
pub fn always() -> EventPredicate {
    Arc::new(|_| true)
}

/// Identifier returned by registration. Ids grow with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Callback invoked for matching events
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: move |event| -> BoxFuture<'static, Result<(), HandlerError>> { Box::pin(f(event)) },
    })
}

/// A registered handler
pub struct HandlerEntry {
    pub(crate) id: HandlerId,
    pub(crate) event_type: EventType,
    pub(crate) predicate: EventPredicate,
    pub(crate) priority: i32,
    pub(crate) handler: Arc<dyn EventHandler>,
    active: AtomicBool,
}

impl HandlerEntry {
    pub(crate) fn new(
        id: HandlerId,
        event_type: EventType,
        predicate: EventPredicate,
        priority: i32,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            id,
            event_type,
            predicate,
            priority,
            handler,
            active: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Cleared on unregistration so in-flight dispatch passes skip the handler
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Evaluate the predicate. A panicking predicate does not match.
    pub(crate) fn matches(&self, event: &Event) -> bool {
        if !self.is_active() || self.event_type != event.event_type() {
            return false;
        }
        let predicate = &self.predicate;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| predicate(event))) {
            Ok(matched) => matched,
            Err(_) => {
                tracing::error!(
                    "Predicate of {} panicked on {} event",
                    self.id,
                    event.event_type()
                );
                false
            }
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
