//! Gateway stack: one bus, one connection manager and one request client
//! wired together.
//!
//! Build one per process and pass clones to whatever needs it. The bus and
//! the pending table outlive individual sockets, so subscriptions survive a
//! reconnect.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::bus::{BusEvent, EventBus, Subscription};
use crate::client::GatewayClient;
use crate::config::{ConnectionConfig, StackOptions};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{ConnectError, RequestError};
use crate::pending::PendingRequests;

#[derive(Clone)]
pub struct GatewayStack {
    bus: EventBus,
    manager: ConnectionManager,
    client: GatewayClient,
}

impl GatewayStack {
    #[must_use]
    pub fn new(options: StackOptions) -> Self {
        let bus = EventBus::new();
        let pending = Arc::new(PendingRequests::new());
        let manager = ConnectionManager::new(bus.clone(), Arc::clone(&pending), options.connection);
        let client = GatewayClient::new(manager.clone(), pending, options.request_timeout);
        Self { bus, manager, client }
    }

    /// Stack with tunables from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(StackOptions::from_env())
    }

    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub fn connect(&self, config: ConnectionConfig) -> Result<(), ConnectError> {
        self.manager.connect(config)
    }

    /// # Errors
    ///
    /// See [`ConnectionManager::reconnect`].
    pub fn reconnect(&self) -> Result<(), ConnectError> {
        self.manager.reconnect()
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn on<F>(&self, pattern: &str, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.bus.on(pattern, handler)
    }

    pub fn stream(&self, pattern: &str) -> (Subscription, mpsc::UnboundedReceiver<BusEvent>) {
        self.bus.stream(pattern)
    }

    /// # Errors
    ///
    /// See [`GatewayClient::send`].
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, RequestError> {
        self.client.send(method, params).await
    }

    /// # Errors
    ///
    /// See [`GatewayClient::call`].
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RequestError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.client.call(method, params).await
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// # Errors
    ///
    /// See [`ConnectionManager::wait_connected`].
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), ConnectError> {
        self.manager.wait_connected(limit).await
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Default for GatewayStack {
    fn default() -> Self {
        Self::new(StackOptions::default())
    }
}

#[cfg(test)]
#[path = "stack_test.rs"]
mod tests;
