//! Controller that logs operations instead of sending them

use async_trait::async_trait;
use automation_engine::{Controller, ControllerError, Operation};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stand-in for the studio connection
#[derive(Debug, Default)]
pub struct LoggingController {
    requests: AtomicU64,
}

impl LoggingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests handled so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Controller for LoggingController {
    async fn execute(&self, operation: &Operation) -> Result<Value, ControllerError> {
        let id = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "-> {} #{} {}",
            operation.request_type(),
            id,
            operation.request_data()
        );
        Ok(json!({ "requestId": id, "requestStatus": { "result": true, "code": 100 } }))
    }
}
