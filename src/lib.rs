//! Client-side connection stack for an OpenClaw gateway.
//!
//! A [`GatewayStack`] bundles:
//! - [`EventBus`]: topic router for gateway events (`agent.*`, `ws.*`, ...)
//! - [`ConnectionManager`]: the socket, its handshake and reconnect machine
//! - [`GatewayClient`]: correlated request/response calls
//!
//! Frames on the wire are JSON, parsed by the `frames` crate.

mod backoff;
pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod methods;
pub mod pending;
pub mod stack;

#[cfg(test)]
pub(crate) mod test_support;

pub use bus::{BusEvent, EventBus, Subscription, TopicPattern, topics};
pub use client::GatewayClient;
pub use config::{BackoffPolicy, ConnectionConfig, ConnectionMode, ConnectionOptions, HandshakeOptions, StackOptions};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{ConnectError, RequestError};
pub use methods::{AgentSummary, HealthStatus, SessionSummary};
pub use pending::PendingRequests;
pub use stack::GatewayStack;
