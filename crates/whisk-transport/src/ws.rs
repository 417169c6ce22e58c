//! WebSocket adapter over `tokio-tungstenite`.
//!
//! Each [`WsConnection`] is driven by one spawned task that owns the socket.
//! The task connects, pumps frames in both directions until the socket
//! closes, then retries according to the [`ReconnectPolicy`] until the
//! policy gives up or [`Connection::disconnect`] is called.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whisk_core::{ConnectionId, ListenerId};
use whisk_settings::TransportSettings;

use crate::adapter::{Ack, Connection, Listener, ListenerTable, Transport, UnhandledListener};
use crate::errors::TransportError;
use crate::events::{CLOSE, CONNECT, DISCONNECT, LifecycleEvent, RECONNECT, RECONNECTING};
use crate::frame::Frame;
use crate::reconnect::ReconnectPolicy;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] that opens WebSocket connections.
#[derive(Clone, Debug, Default)]
pub struct WsTransport {
    policy: ReconnectPolicy,
}

impl WsTransport {
    /// Create a transport with the given reconnection policy.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    /// Create a transport from endpoint settings.
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new(ReconnectPolicy::from(&settings.reconnection))
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, TransportError> {
        validate_url(url)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let conn = Arc::new_cyclic(|this| WsConnection {
            this: this.clone(),
            id: ConnectionId::new(),
            url: url.to_owned(),
            policy: self.policy.clone(),
            runtime,
            started: AtomicBool::new(false),
            listeners: ListenerTable::new(),
            outbound: Mutex::new(None),
            pending_acks: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        debug!(connection_id = %conn.id, url, "websocket connection created");
        Ok(conn)
    }
}

fn validate_url(url: &str) -> Result<(), TransportError> {
    let uri = url.parse::<Uri>().map_err(|e| TransportError::InvalidUrl {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        Some(other) => return Err(TransportError::UnsupportedScheme(other.to_owned())),
        None => {
            return Err(TransportError::InvalidUrl {
                url: url.to_owned(),
                reason: "missing scheme".into(),
            });
        }
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(TransportError::InvalidUrl {
            url: url.to_owned(),
            reason: "missing host".into(),
        });
    }
    Ok(())
}

/// A WebSocket [`Connection`].
pub struct WsConnection {
    this: Weak<WsConnection>,
    id: ConnectionId,
    url: String,
    policy: ReconnectPolicy,
    runtime: tokio::runtime::Handle,
    started: AtomicBool,
    listeners: ListenerTable,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending_acks: Mutex<HashMap<u64, Ack>>,
    next_ack: AtomicU64,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl WsConnection {
    /// URL this connection dials.
    pub fn url(&self) -> &str {
        &self.url
    }

    #[tracing::instrument(skip_all, fields(connection_id = %self.id))]
    async fn drive(self: Arc<Self>, policy: ReconnectPolicy) {
        let mut attempt: u32 = 0;
        let mut retrying = false;

        loop {
            let result = tokio::select! {
                () = self.cancel.cancelled() => break,
                r = tokio_tungstenite::connect_async(self.url.as_str()) => r,
            };

            match result {
                Ok((socket, _response)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *self.outbound.lock() = Some(tx);
                    self.connected.store(true, Ordering::SeqCst);
                    info!(url = %self.url, "websocket connected");

                    let _ = self.listeners.dispatch(CONNECT, &Value::Null, None);
                    if retrying {
                        let _ = self.listeners.dispatch(RECONNECT, &Value::from(attempt), None);
                    }
                    attempt = 0;
                    retrying = false;

                    let reason = self.pump(socket, rx).await;

                    self.connected.store(false, Ordering::SeqCst);
                    *self.outbound.lock() = None;
                    self.pending_acks.lock().clear();
                    info!(reason, "websocket disconnected");
                    let _ = self.listeners.dispatch(DISCONNECT, &Value::from(reason), None);
                }
                Err(error) => {
                    warn!(url = %self.url, error = %error, attempt, "websocket connect failed");
                }
            }

            if self.cancel.is_cancelled() || !policy.should_retry(attempt) {
                break;
            }
            let delay = policy.delay(attempt);
            attempt += 1;
            retrying = true;
            debug!(attempt, delay_ms = delay.as_millis(), "reconnecting");
            let _ = self.listeners.dispatch(RECONNECTING, &Value::from(attempt), None);

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("websocket closed");
        let _ = self.listeners.dispatch(CLOSE, &Value::Null, None);
    }

    /// Move frames until the socket ends. Returns the disconnect reason.
    async fn pump(
        &self,
        socket: Socket,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) -> &'static str {
        let (mut sink, mut source) = socket.split();
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return "io client disconnect";
                }
                Some(msg) = outbound.recv() => {
                    if let Err(error) = sink.send(msg).await {
                        warn!(error = %error, "websocket send failed");
                        return "transport error";
                    }
                }
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_text(text),
                        Err(_) => warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return "transport close",
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(error = %error, "websocket read failed");
                        return "transport error";
                    }
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::Event { event, data, ack }) => {
                if LifecycleEvent::is_reserved(&event) {
                    warn!(event, "peer sent a reserved lifecycle event name, dropping");
                    return;
                }
                let ack = ack.map(|id| self.reply_ack(id));
                let _ = self.listeners.dispatch_inbound(&event, &data, ack.as_ref());
            }
            Ok(Frame::AckReply { ack, data }) => {
                let pending = self.pending_acks.lock().remove(&ack);
                match pending {
                    Some(reply) => {
                        let _ = reply.send(data);
                    }
                    None => debug!(ack, "ack reply for unknown id"),
                }
            }
            Err(error) => warn!(error = %error, "dropping malformed frame"),
        }
    }

    fn reply_ack(&self, id: u64) -> Ack {
        let tx = self.outbound.lock().clone();
        Ack::new(move |data: Value| {
            let Some(tx) = tx else { return };
            match (Frame::AckReply { ack: id, data }).to_text() {
                Ok(text) => {
                    let _ = tx.send(Message::text(text));
                }
                Err(error) => warn!(error = %error, ack = id, "failed to encode ack reply"),
            }
        })
    }
}

impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        info!(connection_id = %self.id, url = %self.url, "opening websocket");
        let _ = self.runtime.spawn(this.drive(self.policy.clone()));
    }

    fn emit(&self, event: &str, payload: Value, ack: Option<Ack>) -> bool {
        let Some(tx) = self.outbound.lock().clone() else {
            debug!(event, "emit while disconnected, dropping");
            return false;
        };
        let ack_id = ack.map(|ack| {
            let id = self.next_ack.fetch_add(1, Ordering::SeqCst);
            let _ = self.pending_acks.lock().insert(id, ack);
            id
        });
        match Frame::event(event, payload, ack_id).to_text() {
            Ok(text) => tx.send(Message::text(text)).is_ok(),
            Err(error) => {
                warn!(event, error = %error, "failed to encode event");
                false
            }
        }
    }

    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.listeners.add(event, listener)
    }

    fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }

    fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    fn set_unhandled(&self, sink: Option<UnhandledListener>) {
        self.listeners.set_unhandled(sink);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        if !self.cancel.is_cancelled() {
            debug!(connection_id = %self.id, "disconnect requested");
            self.cancel.cancel();
        }
    }
}
