//! Connection configuration and stack tunables.
//!
//! `ConnectionConfig` is what the caller hands to `connect()`; it is immutable
//! for the lifetime of one connection attempt. `StackOptions` carries the
//! timing knobs (timeouts, heartbeat, backoff) and is fixed when the stack is
//! built. Both can be read from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 45_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 8_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.2;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

pub const DEFAULT_CLIENT_ID: &str = "mission-control";
pub const DEFAULT_CLIENT_ROLE: &str = "operator";
pub const DEFAULT_CLIENT_SCOPE: &str = "operator.admin";

// =============================================================================
// CONNECTION CONFIG
// =============================================================================

/// Where the gateway runs relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Local,
    Remote,
}

impl ConnectionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(ConnectError::InvalidMode(other.to_owned())),
        }
    }
}

/// Caller-supplied target for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` URL of the gateway.
    pub url: String,
    /// Auth token presented during the connect handshake. Empty means none.
    pub token: String,
    pub mode: ConnectionMode,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>, mode: ConnectionMode) -> Self {
        Self { url: url.into(), token: token.into(), mode }
    }

    /// Build from environment variables.
    ///
    /// Optional:
    /// - `GATEWAY_URL`: default `ws://127.0.0.1:18789`
    /// - `GATEWAY_TOKEN`: default empty
    /// - `GATEWAY_MODE`: `local` (default) or `remote`
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidMode`] for an unknown `GATEWAY_MODE`.
    pub fn from_env() -> Result<Self, ConnectError> {
        let url = std::env::var("GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_owned());
        let token = std::env::var("GATEWAY_TOKEN").unwrap_or_default();
        let mode = match std::env::var("GATEWAY_MODE") {
            Ok(raw) if !raw.is_empty() => raw.parse()?,
            _ => ConnectionMode::Local,
        };
        Ok(Self { url, token, mode })
    }

    /// Check that the URL names a WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidUrl`] unless the URL starts with `ws://`
    /// or `wss://` and has a host part.
    pub fn validate(&self) -> Result<(), ConnectError> {
        let rest = self
            .url
            .strip_prefix("ws://")
            .or_else(|| self.url.strip_prefix("wss://"))
            .ok_or_else(|| ConnectError::InvalidUrl(self.url.clone()))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(ConnectError::InvalidUrl(self.url.clone()));
        }
        if self.mode == ConnectionMode::Remote && self.url.starts_with("ws://") {
            tracing::warn!(url = %self.url, "gateway: remote connection over unencrypted ws://");
        }
        Ok(())
    }
}

// =============================================================================
// TUNABLES
// =============================================================================

/// Exponential backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    /// Ceiling for any single delay.
    pub max: Duration,
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

/// Identity and timing of the `connect.challenge` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// When false the socket counts as connected as soon as it opens.
    pub enabled: bool,
    pub timeout: Duration,
    pub client_id: String,
    pub role: String,
    pub scopes: Vec<String>,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            role: DEFAULT_CLIENT_ROLE.to_owned(),
            scopes: vec![DEFAULT_CLIENT_SCOPE.to_owned()],
        }
    }
}

/// Connection manager tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Upper bound for opening the TCP/TLS/WS connection.
    pub connect_timeout: Duration,
    pub handshake: HandshakeOptions,
    /// Ping cadence while connected.
    pub heartbeat_interval: Duration,
    /// Silence longer than this is treated as a stalled connection.
    pub idle_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Retries after a failure before giving up. 0 disables retrying.
    pub max_attempts: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            handshake: HandshakeOptions::default(),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            backoff: BackoffPolicy::default(),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Everything needed to build a `GatewayStack`.
#[derive(Debug, Clone, PartialEq)]
pub struct StackOptions {
    pub connection: ConnectionOptions,
    /// Default per-request timeout for `send()`.
    pub request_timeout: Duration,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl StackOptions {
    /// Build tunables from environment variables, falling back to the
    /// `DEFAULT_*` constants for anything missing or unparseable.
    ///
    /// Optional:
    /// - `GATEWAY_REQUEST_TIMEOUT_MS`
    /// - `GATEWAY_CONNECT_TIMEOUT_MS`
    /// - `GATEWAY_HANDSHAKE` (`true`/`false`)
    /// - `GATEWAY_HANDSHAKE_TIMEOUT_MS`
    /// - `GATEWAY_HEARTBEAT_INTERVAL_MS`
    /// - `GATEWAY_IDLE_TIMEOUT_MS`
    /// - `GATEWAY_BACKOFF_INITIAL_MS`, `GATEWAY_BACKOFF_MAX_MS`
    /// - `GATEWAY_BACKOFF_MULTIPLIER`, `GATEWAY_BACKOFF_JITTER`
    /// - `GATEWAY_MAX_RECONNECT_ATTEMPTS`
    #[must_use]
    pub fn from_env() -> Self {
        let handshake = HandshakeOptions {
            enabled: env_parse("GATEWAY_HANDSHAKE", true),
            timeout: env_millis("GATEWAY_HANDSHAKE_TIMEOUT_MS", DEFAULT_HANDSHAKE_TIMEOUT_MS),
            ..HandshakeOptions::default()
        };
        let backoff = BackoffPolicy {
            initial: env_millis("GATEWAY_BACKOFF_INITIAL_MS", DEFAULT_BACKOFF_INITIAL_MS),
            max: env_millis("GATEWAY_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            multiplier: env_parse("GATEWAY_BACKOFF_MULTIPLIER", DEFAULT_BACKOFF_MULTIPLIER),
            jitter: env_parse("GATEWAY_BACKOFF_JITTER", DEFAULT_BACKOFF_JITTER),
        };
        let connection = ConnectionOptions {
            connect_timeout: env_millis("GATEWAY_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            handshake,
            heartbeat_interval: env_millis("GATEWAY_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_timeout: env_millis("GATEWAY_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS),
            backoff,
            max_attempts: env_parse("GATEWAY_MAX_RECONNECT_ATTEMPTS", DEFAULT_MAX_RECONNECT_ATTEMPTS),
        };

        Self { connection, request_timeout: env_millis("GATEWAY_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS) }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
