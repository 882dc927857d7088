//! Request/response client over the connection manager.
//!
//! `send` never queues: if the connection is not `connected` the call fails
//! with `NotConnected` before anything is written. Responses are matched by
//! correlation id, so they may arrive in any order.

use std::sync::Arc;
use std::time::Duration;

use frames::{Frame, RequestFrame};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::RequestError;
use crate::pending::PendingRequests;

#[derive(Clone)]
pub struct GatewayClient {
    manager: ConnectionManager,
    pending: Arc<PendingRequests>,
    request_timeout: Duration,
}

impl GatewayClient {
    #[must_use]
    pub fn new(manager: ConnectionManager, pending: Arc<PendingRequests>, request_timeout: Duration) -> Self {
        Self { manager, pending, request_timeout }
    }

    /// Send `method` with the default timeout and wait for its payload.
    ///
    /// # Errors
    ///
    /// See [`GatewayClient::send_with_timeout`].
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, RequestError> {
        self.send_with_timeout(method, params, self.request_timeout).await
    }

    /// Send `method` and wait up to `limit` for the matching response.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotConnected`] if the connection is not up
    /// - [`RequestError::Timeout`] if no response arrives within `limit`
    /// - [`RequestError::ConnectionLost`] if the connection drops first
    /// - [`RequestError::Remote`] if the gateway answers `ok: false`
    pub async fn send_with_timeout(&self, method: &str, params: Value, limit: Duration) -> Result<Value, RequestError> {
        if !self.manager.is_connected() {
            return Err(RequestError::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let rx = self.pending.register(&id, method);
        let _entry = EntryGuard { pending: &self.pending, id: &id };
        let text = frames::encode_frame(&Frame::Request(RequestFrame::new(id.clone(), method, params)));
        if !self.manager.transmit(text) {
            return Err(RequestError::NotConnected);
        }
        debug!(%id, %method, "client: request sent");

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without settling: the table was torn down.
            Ok(Err(_)) => Err(RequestError::ConnectionLost),
            Err(_) => {
                let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(%id, %method, timeout_ms, "client: request timed out");
                Err(RequestError::Timeout { method: method.to_owned(), timeout_ms })
            }
        }
    }

    /// Typed `send`: serialize `params`, deserialize the payload into `R`.
    ///
    /// # Errors
    ///
    /// Everything [`GatewayClient::send`] returns, plus
    /// [`RequestError::Encode`] / [`RequestError::Decode`].
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RequestError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RequestError::Encode(e.to_string()))?;
        let payload = self.send(method, params).await?;
        serde_json::from_value(payload)
            .map_err(|e| RequestError::Decode { method: method.to_owned(), message: e.to_string() })
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Removes the pending entry when `send_with_timeout` returns or its future
/// is dropped mid-flight. A settled entry is already gone, so this is a no-op.
struct EntryGuard<'a> {
    pending: &'a PendingRequests,
    id: &'a str,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.pending.cancel(self.id) {
            debug!(id = %self.id, "client: dropped unsettled request");
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
