//! Event bus for studio notifications
//!
//! Routes [`Event`](studio_events::Event)s to registered handlers through an
//! ordered middleware pipeline, with bounded admission, per-handler timeouts
//! and recording/replay of the emitted stream.

pub mod bus;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod persistence;
pub mod recorder;

pub use bus::{BusConfig, BusStats, EventBus};
pub use error::{BusError, HandlerError};
pub use handler::{always, handler_fn, EventHandler, EventPredicate, HandlerId};
pub use middleware::{
    DispatchContext, DispatchReport, GateMiddleware, LoggingMiddleware, Middleware, Next,
    TimingMiddleware,
};
pub use recorder::{RecordedEvent, Recording, RecordingEntry, ReplayReport};
