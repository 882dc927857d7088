//! In-process mock gateway for socket-level tests.
//!
//! Binds `127.0.0.1:0`, speaks the challenge handshake, and hands every
//! accepted connection to the test as a [`MockConn`]. Dropping a `MockConn`
//! closes its socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::config::{BackoffPolicy, ConnectionConfig, ConnectionMode, ConnectionOptions, HandshakeOptions};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Skip the challenge; the socket is usable as soon as it opens.
    pub no_handshake: bool,
    /// Reject `connect` unless `auth.token` equals this.
    pub required_token: Option<String>,
    /// Reject every `connect`.
    pub reject: bool,
}

pub struct MockGateway {
    url: String,
    conns: mpsc::UnboundedReceiver<MockConn>,
    handshakes: Arc<AtomicUsize>,
}

impl MockGateway {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, conns) = mpsc::unbounded_channel();
        let handshakes = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&handshakes);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(serve(tcp, options.clone(), tx.clone(), Arc::clone(&counter)));
            }
        });

        Self { url, conns, handshakes }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.url.clone(), "", ConnectionMode::Local)
    }

    /// Next connection that completed the handshake.
    pub async fn accept(&mut self) -> MockConn {
        timeout(WAIT, self.conns.recv()).await.expect("no connection within timeout").expect("mock gateway stopped")
    }

    /// Assert no connection completes the handshake within `window`.
    pub async fn expect_no_connection(&mut self, window: Duration) {
        assert!(timeout(window, self.conns.recv()).await.is_err(), "unexpected connection");
    }

    /// Number of `connect` requests seen, accepted or not.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

pub struct MockConn {
    /// Params of the `connect` request, when the handshake ran.
    pub connect_params: Option<Value>,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl MockConn {
    pub fn send_text(&self, text: &str) {
        let _ = self.outbound.send(Message::Text(text.to_owned().into()));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_event(&self, event: &str, payload: Value) {
        self.send_json(&json!({ "type": "event", "event": event, "payload": payload }));
    }

    /// Next JSON frame the client sent.
    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.inbound.recv()).await.expect("no frame within timeout").expect("socket closed")
    }

    /// Next frame, asserted to be a request for `method`. Returns its id.
    pub async fn expect_request(&mut self, method: &str) -> (String, Value) {
        let frame = self.recv().await;
        assert_eq!(frame["type"], "req", "unexpected frame {frame}");
        assert_eq!(frame["method"], method, "unexpected frame {frame}");
        (frame["id"].as_str().unwrap().to_owned(), frame["params"].clone())
    }

    /// Resolves once the client side has closed the socket.
    pub async fn closed(&mut self) {
        while self.inbound.recv().await.is_some() {}
    }

    pub fn respond_ok(&self, id: &str, payload: Value) {
        self.send_json(&json!({ "type": "res", "id": id, "ok": true, "payload": payload }));
    }

    pub fn respond_err(&self, id: &str, code: &str, message: &str) {
        self.send_json(&json!({ "type": "res", "id": id, "ok": false, "error": { "code": code, "message": message } }));
    }
}

async fn serve(
    tcp: TcpStream,
    options: MockOptions,
    conns: mpsc::UnboundedSender<MockConn>,
    handshakes: Arc<AtomicUsize>,
) {
    let Ok(mut ws) = accept_async(tcp).await else {
        return;
    };

    let connect_params = if options.no_handshake {
        None
    } else {
        match server_handshake(&mut ws, &options, &handshakes).await {
            Some(params) => Some(params),
            None => {
                let _ = ws.close(None).await;
                return;
            }
        }
    };

    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    if conns.send(MockConn { connect_params, inbound, outbound }).is_err() {
        return;
    }

    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = inbound_tx.send(value);
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            message = outbound_rx.recv() => match message {
                Some(message) => {
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
}

async fn server_handshake(
    ws: &mut WebSocketStream<TcpStream>,
    options: &MockOptions,
    handshakes: &AtomicUsize,
) -> Option<Value> {
    let challenge = json!({ "type": "event", "event": "connect.challenge", "payload": { "nonce": "n-1", "ts": 0 } });
    ws.send(Message::Text(challenge.to_string().into())).await.ok()?;

    let request = loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str()).ok()?;
                if value["method"] == "connect" {
                    break value;
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    };
    handshakes.fetch_add(1, Ordering::SeqCst);

    let id = request["id"].as_str()?.to_owned();
    let params = request["params"].clone();
    let token_ok = options.required_token.as_deref().is_none_or(|token| params["auth"]["token"] == token);
    let reply = if options.reject || !token_ok {
        json!({ "type": "res", "id": id, "ok": false, "error": { "code": "UNAUTHORIZED", "message": "bad token" } })
    } else {
        json!({ "type": "res", "id": id, "ok": true, "payload": { "protocol": 1 } })
    };
    ws.send(Message::Text(reply.to_string().into())).await.ok()?;

    if options.reject || !token_ok { None } else { Some(params) }
}

/// A `ws://` URL nothing is listening on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

/// Options with short timers so reconnect tests finish quickly.
pub fn fast_options(max_attempts: u32) -> ConnectionOptions {
    ConnectionOptions {
        connect_timeout: Duration::from_secs(2),
        handshake: HandshakeOptions { timeout: Duration::from_secs(2), ..HandshakeOptions::default() },
        heartbeat_interval: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(90),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: 0.0,
        },
        max_attempts,
    }
}
