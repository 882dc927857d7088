//! Connection manager: owns the gateway socket and its reconnect state machine.
//!
//! DESIGN
//! ======
//! `connect()` spawns one driver task per connection. The driver is the only
//! code that touches the socket; everything else reaches it through an
//! outbound `mpsc` channel that exists only while the state is `connected`.
//!
//! Every state change is stamped with an epoch. `connect()` and `disconnect()`
//! bump the epoch, so a driver left over from an earlier connection can no
//! longer change state or publish lifecycle events.
//!
//! LIFECYCLE
//! =========
//! 1. `connect()` → `connecting`, driver opens the socket (+ handshake)
//! 2. Success → `connected`, `ws.connected { mode }`
//! 3. Close / error / stall → `reconnecting`, `ws.failed`, `ws.reconnecting`,
//!    backoff sleep, back to 2
//! 4. Retries exhausted → `failed`, terminal `ws.failed`
//! 5. `disconnect()` from any state → `disconnected`, driver exits

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{Frame, RequestFrame, ResponseOutcome};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, topics};
use crate::config::{ConnectionConfig, ConnectionOptions, HandshakeOptions};
use crate::error::ConnectError;
use crate::pending::PendingRequests;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until the next `connect()`.
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    epoch: u64,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<oneshot::Sender<()>>,
    config: Option<ConnectionConfig>,
}

struct Shared {
    bus: EventBus,
    pending: Arc<PendingRequests>,
    options: ConnectionOptions,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Move to `next` unless `epoch` is stale. Leaving `connected` drops the
    /// outbound channel and fails every pending request.
    fn transition(&self, epoch: u64, next: ConnectionState) -> bool {
        let left_connected = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return false;
            }
            let left = inner.state == ConnectionState::Connected && next != ConnectionState::Connected;
            inner.outbound = None;
            inner.state = next;
            self.state_tx.send_replace(next);
            left
        };
        if left_connected {
            self.pending.fail_all();
        }
        true
    }

    fn mark_connected(&self, epoch: u64, outbound: mpsc::UnboundedSender<Message>) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.outbound = Some(outbound);
        inner.state = ConnectionState::Connected;
        self.state_tx.send_replace(ConnectionState::Connected);
        true
    }

    /// Publish a lifecycle event on behalf of the driver for `epoch`.
    /// The registry lock is not held here, so handlers may call back into
    /// the manager.
    fn publish(&self, epoch: u64, topic: &str, payload: Value) {
        if self.is_current(epoch) {
            self.bus.emit(topic, &payload);
        }
    }

    /// Route one inbound text frame. Malformed frames are dropped.
    fn route_text(&self, text: &str) {
        match frames::decode_frame(text) {
            Ok(Frame::Event(event)) => {
                self.bus.emit(&event.event, &event.payload);
            }
            Ok(Frame::Response(response)) => {
                self.pending.complete(response);
            }
            Ok(Frame::Request(request)) => {
                debug!(id = %request.id, method = %request.method, "gateway: ignoring inbound request");
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "gateway: dropped malformed frame");
            }
        }
    }

    fn route_binary(&self, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.route_text(text),
            Err(e) => warn!(error = %e, len = bytes.len(), "gateway: dropped non-utf8 binary frame"),
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Handle to the connection. Clones share one socket and state machine.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(bus: EventBus, pending: Arc<PendingRequests>, options: ConnectionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            epoch: 0,
            state: ConnectionState::Disconnected,
            outbound: None,
            shutdown: None,
            config: None,
        };
        Self { shared: Arc::new(Shared { bus, pending, options, inner: Mutex::new(inner), state_tx }) }
    }

    /// Start (or restart) the connection state machine. Any previous
    /// connection is closed first. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidUrl`] if the URL is not `ws://`/`wss://`.
    pub fn connect(&self, config: ConnectionConfig) -> Result<(), ConnectError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (epoch, previous, left_connected) = {
            let mut inner = self.shared.lock();
            inner.epoch += 1;
            let left_connected = inner.state == ConnectionState::Connected;
            inner.outbound = None;
            inner.state = ConnectionState::Connecting;
            inner.config = Some(config.clone());
            let previous = inner.shutdown.replace(shutdown_tx);
            self.shared.state_tx.send_replace(ConnectionState::Connecting);
            (inner.epoch, previous, left_connected)
        };
        if let Some(previous) = previous {
            let _ = previous.send(());
        }
        if left_connected {
            self.shared.pending.fail_all();
        }

        info!(url = %config.url, mode = %config.mode, epoch, "gateway: connecting");
        tokio::spawn(run_driver(Arc::clone(&self.shared), epoch, config, shutdown_rx));
        Ok(())
    }

    /// Restart with the last config passed to [`ConnectionManager::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::MissingConfig`] if `connect()` was never called.
    pub fn reconnect(&self) -> Result<(), ConnectError> {
        let config = self.shared.lock().config.clone().ok_or(ConnectError::MissingConfig)?;
        self.connect(config)
    }

    /// Close the socket, cancel any scheduled retry and fail pending requests.
    pub fn disconnect(&self) {
        let (shutdown, previous) = {
            let mut inner = self.shared.lock();
            inner.epoch += 1;
            inner.outbound = None;
            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            self.shared.state_tx.send_replace(ConnectionState::Disconnected);
            (inner.shutdown.take(), previous)
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        self.shared.pending.fail_all();
        if previous != ConnectionState::Disconnected {
            info!(from = %previous, "gateway: disconnected");
        }
    }

    /// Queue a text frame for the socket. Returns false unless connected.
    pub fn transmit(&self, text: String) -> bool {
        let inner = self.shared.lock();
        if inner.state != ConnectionState::Connected {
            return false;
        }
        inner.outbound.as_ref().is_some_and(|tx| tx.send(Message::Text(text.into())).is_ok())
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Config of the most recent `connect()`, if any.
    #[must_use]
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.shared.lock().config.clone()
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// Wait until the state is `connected`.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::Exhausted`] if the manager reaches `failed`
    /// - [`ConnectError::Disconnected`] if it is (or becomes) `disconnected`
    /// - [`ConnectError::Timeout`] if neither happens within `limit`
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), ConnectError> {
        let mut rx = self.watch_state();
        let wait = async move {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed => return Err(ConnectError::Exhausted),
                    ConnectionState::Disconnected => return Err(ConnectError::Disconnected),
                    ConnectionState::Connecting | ConnectionState::Reconnecting => {}
                }
                if rx.changed().await.is_err() {
                    return Err(ConnectError::Disconnected);
                }
            }
        };
        timeout(limit, wait).await.unwrap_or(Err(ConnectError::Timeout(limit)))
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager").field("state", &self.state()).finish_non_exhaustive()
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn run_driver(
    shared: Arc<Shared>,
    epoch: u64,
    config: ConnectionConfig,
    mut shutdown: oneshot::Receiver<()>,
) {
    let max_attempts = shared.options.max_attempts;
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = &mut shutdown => return,
            result = open_session(&shared, &config) => result,
        };

        let reason = match opened {
            Ok(ws) => {
                let (tx, rx) = mpsc::unbounded_channel();
                if !shared.mark_connected(epoch, tx) {
                    return;
                }
                attempt = 0;
                info!(url = %config.url, mode = %config.mode, epoch, "gateway: connected");
                shared.publish(epoch, topics::WS_CONNECTED, json!({ "mode": config.mode }));

                match run_session(&shared, ws, rx, &mut shutdown).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Err(reason) => reason,
        };

        if attempt >= max_attempts {
            if !shared.transition(epoch, ConnectionState::Failed) {
                return;
            }
            warn!(%reason, attempt, "gateway: connection failed");
            shared.publish(epoch, topics::WS_FAILED, json!({ "reason": reason, "terminal": false }));
            let terminal = format!("reconnect attempts exhausted ({max_attempts}): {reason}");
            error!(reason = %terminal, "gateway: giving up");
            shared.publish(epoch, topics::WS_FAILED, json!({ "reason": terminal, "terminal": true }));
            return;
        }

        if !shared.transition(epoch, ConnectionState::Reconnecting) {
            return;
        }
        warn!(%reason, attempt, "gateway: connection failed");
        shared.publish(epoch, topics::WS_FAILED, json!({ "reason": reason, "terminal": false }));

        attempt += 1;
        let delay = shared.options.backoff.delay(attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(attempt, max_attempts, delay_ms, "gateway: scheduling reconnect");
        shared.publish(
            epoch,
            topics::WS_RECONNECTING,
            json!({ "attempt": attempt, "maxAttempts": max_attempts, "delayMs": delay_ms }),
        );

        tokio::select! {
            _ = &mut shutdown => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !shared.is_current(epoch) {
            return;
        }
    }
}

/// Open the socket and, when enabled, complete the connect handshake.
async fn open_session(shared: &Shared, config: &ConnectionConfig) -> Result<WsStream, String> {
    let options = &shared.options;
    let mut ws = match timeout(options.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => return Err(format!("connect failed: {e}")),
        Err(_) => return Err(format!("connect timed out after {}ms", options.connect_timeout.as_millis())),
    };

    if !options.handshake.enabled {
        return Ok(ws);
    }

    match timeout(options.handshake.timeout, handshake(shared, &mut ws, config)).await {
        Ok(Ok(())) => Ok(ws),
        Ok(Err(reason)) => {
            let _ = ws.close(None).await;
            Err(reason)
        }
        Err(_) => {
            let _ = ws.close(None).await;
            Err(format!("handshake timed out after {}ms", options.handshake.timeout.as_millis()))
        }
    }
}

/// Wait for `connect.challenge`, send `connect`, wait for its response.
/// Events that arrive meanwhile still reach the bus.
async fn handshake(shared: &Shared, ws: &mut WsStream, config: &ConnectionConfig) -> Result<(), String> {
    loop {
        match next_frame(ws).await? {
            Frame::Event(event) if event.event == topics::CONNECT_CHALLENGE => break,
            other => route_early(shared, other),
        }
    }

    let id = Uuid::new_v4().to_string();
    let request = RequestFrame::new(id.clone(), "connect", connect_params(&shared.options.handshake, config));
    let text = frames::encode_frame(&request.into());
    ws.send(Message::Text(text.into())).await.map_err(|e| format!("handshake send failed: {e}"))?;

    loop {
        match next_frame(ws).await? {
            Frame::Response(response) if response.id == id => {
                return match response.outcome {
                    ResponseOutcome::Ok(_) => {
                        debug!(%id, "gateway: handshake accepted");
                        Ok(())
                    }
                    ResponseOutcome::Err(shape) => Err(format!("handshake rejected: {}: {}", shape.code, shape.message)),
                };
            }
            other => route_early(shared, other),
        }
    }
}

fn route_early(shared: &Shared, frame: Frame) {
    match frame {
        Frame::Event(event) => {
            shared.bus.emit(&event.event, &event.payload);
        }
        Frame::Response(response) => {
            shared.pending.complete(response);
        }
        Frame::Request(request) => {
            debug!(id = %request.id, method = %request.method, "gateway: ignoring inbound request during handshake");
        }
    }
}

/// Next well-formed frame from the socket. Malformed frames are skipped.
async fn next_frame(ws: &mut WsStream) -> Result<Frame, String> {
    loop {
        let message = match ws.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(format!("socket error during handshake: {e}")),
            None => return Err("socket closed during handshake".to_owned()),
        };
        let decoded = match &message {
            Message::Text(text) => frames::decode_frame(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => frames::decode_frame(text),
                Err(e) => {
                    warn!(error = %e, "gateway: dropped non-utf8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => return Err("socket closed during handshake".to_owned()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        match decoded {
            Ok(frame) => return Ok(frame),
            Err(e) => warn!(error = %e, "gateway: dropped malformed frame"),
        }
    }
}

fn connect_params(handshake: &HandshakeOptions, config: &ConnectionConfig) -> Value {
    let mut params = Map::new();
    params.insert(
        "client".into(),
        json!({
            "id": handshake.client_id,
            "version": env!("CARGO_PKG_VERSION"),
            "platform": std::env::consts::OS,
            "mode": config.mode,
        }),
    );
    params.insert("role".into(), json!(handshake.role));
    params.insert("scopes".into(), json!(handshake.scopes));
    if !config.token.is_empty() {
        params.insert("auth".into(), json!({ "token": config.token }));
    }
    Value::Object(params)
}

/// Pump the open socket until shutdown or loss.
async fn run_session(
    shared: &Shared,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let interval = shared.options.heartbeat_interval;
    let idle_timeout = shared.options.idle_timeout;
    let mut heartbeat = interval_at(Instant::now() + interval, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = sink.send(message).await {
                    return SessionEnd::Lost(format!("send failed: {e}"));
                }
            }
            message = stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return SessionEnd::Lost(format!("socket error: {e}")),
                    None => return SessionEnd::Lost("socket closed".to_owned()),
                };
                last_seen = Instant::now();
                match message {
                    Message::Text(text) => shared.route_text(text.as_str()),
                    Message::Binary(bytes) => shared.route_binary(&bytes),
                    Message::Close(frame) => {
                        let reason = match frame {
                            Some(frame) => format!("socket closed ({}): {}", u16::from(frame.code), frame.reason.as_str()),
                            None => "socket closed".to_owned(),
                        };
                        return SessionEnd::Lost(reason);
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    return SessionEnd::Lost("heartbeat missed".to_owned());
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    return SessionEnd::Lost(format!("ping failed: {e}"));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
