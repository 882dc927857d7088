//! Error types surfaced by the gateway stack.
//!
//! ERROR HANDLING
//! ==============
//! Only caller-initiated operations produce errors. Malformed inbound frames
//! are dropped and logged inside the connection manager, and socket faults
//! become lifecycle events on the bus (`ws.failed`, `ws.reconnecting`), never
//! errors returned from arbitrary call sites.

use std::time::Duration;

/// Failure of a single `send()` / `call()`.
///
/// `Clone` so one connection loss can settle many waiters with the same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The connection was not in the `connected` state; nothing was written.
    #[error("gateway is not connected")]
    NotConnected,
    /// No response arrived in time. The gateway may or may not have acted on
    /// the request.
    #[error("request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },
    /// The connection dropped while the request was in flight.
    #[error("connection lost while request was pending")]
    ConnectionLost,
    /// The gateway answered `ok: false`. Code and message are verbatim.
    #[error("gateway error {code}: {message}")]
    Remote { code: String, message: String },
    /// Request params could not be serialized.
    #[error("failed to encode params: {0}")]
    Encode(String),
    /// The response payload did not match the expected shape.
    #[error("failed to decode {method} payload: {message}")]
    Decode { method: String, message: String },
}

impl RequestError {
    /// Whether retrying the same call could reasonably succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Timeout { .. } | Self::ConnectionLost)
    }
}

/// Failure to start a connection or to observe it reaching `connected`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid gateway URL {0:?}: expected ws:// or wss://")]
    InvalidUrl(String),
    #[error("invalid connection mode {0:?}: expected local or remote")]
    InvalidMode(String),
    /// `reconnect()` was called before any `connect()`.
    #[error("no previous connection config to reconnect with")]
    MissingConfig,
    /// The reconnect schedule ran out; the manager is in `failed`.
    #[error("gateway connection failed after exhausting reconnect attempts")]
    Exhausted,
    /// `disconnect()` was called while waiting.
    #[error("gateway connection was closed")]
    Disconnected,
    #[error("gateway did not connect within {0:?}")]
    Timeout(Duration),
}
