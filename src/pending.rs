//! Correlation table for in-flight requests.
//!
//! Each entry maps a request id to the oneshot sender its caller is awaiting.
//! Entries leave the table exactly once: on a matching response, on timeout
//! (the caller cancels it), or when the connection drops (`fail_all`). A
//! response for an id no longer in the table is logged and ignored.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use frames::{ResponseFrame, ResponseOutcome};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::RequestError;

pub type PendingResult = Result<Value, RequestError>;

struct Pending {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<PendingResult>,
}

#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Pending>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a request and return the receiver its caller awaits.
    /// Re-registering an id replaces (and thereby drops) the older waiter.
    pub fn register(&self, id: &str, method: &str) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        let pending = Pending { method: method.to_owned(), created_at: Instant::now(), tx };
        if self.lock().insert(id.to_owned(), pending).is_some() {
            warn!(%id, %method, "pending: replaced duplicate request id");
        }
        rx
    }

    /// Settle the request matching `response.id`. Returns false when no such
    /// request is pending (late, duplicate, or unsolicited response).
    pub fn complete(&self, response: ResponseFrame) -> bool {
        let Some(pending) = self.lock().remove(&response.id) else {
            warn!(id = %response.id, ok = response.is_ok(), "pending: response for unknown request id");
            return false;
        };

        let result = match response.outcome {
            ResponseOutcome::Ok(payload) => Ok(payload),
            ResponseOutcome::Err(shape) => Err(RequestError::Remote { code: shape.code, message: shape.message }),
        };
        debug!(
            id = %response.id,
            method = %pending.method,
            ok = result.is_ok(),
            elapsed_ms = pending.created_at.elapsed().as_millis(),
            "pending: request settled"
        );
        // The caller may have stopped waiting; that is not an error.
        let _ = pending.tx.send(result);
        true
    }

    /// Drop an entry without settling it. Returns whether it was present.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Reject every pending request with `ConnectionLost`.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(String, Pending)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            debug!(%id, method = %pending.method, "pending: failing request on connection loss");
            let _ = pending.tx.send(Err(RequestError::ConnectionLost));
        }
        if count > 0 {
            info!(count, "pending: failed in-flight requests after connection loss");
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
