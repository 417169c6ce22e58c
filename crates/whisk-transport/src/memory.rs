//! In-process transport adapter.
//!
//! Nothing happens on its own, not even after `start`: the caller drives
//! the connection through [`MemoryConnection::open`],
//! [`MemoryConnection::deliver`] and friends, and inspects what the client
//! sent with [`MemoryConnection::emitted`].
//! Listeners run synchronously on the caller's thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use whisk_core::{ConnectionId, ListenerId};

use crate::adapter::{Ack, Connection, Listener, ListenerTable, Transport, UnhandledListener};
use crate::errors::TransportError;
use crate::events::{CLOSE, CONNECT, DISCONNECT, LifecycleEvent, RECONNECT, RECONNECTING};

/// [`Transport`] that hands out [`MemoryConnection`]s.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    connections: Mutex<Vec<Arc<MemoryConnection>>>,
    refuse: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport with no connections yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Every connection handed out so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<MemoryConnection>> {
        self.connections.lock().clone()
    }

    /// The most recent connection.
    pub fn last_connection(&self) -> Option<Arc<MemoryConnection>> {
        self.connections.lock().last().cloned()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidUrl {
                url: url.to_owned(),
                reason: "connection refused".into(),
            });
        }
        let conn = Arc::new(MemoryConnection::new(url));
        tracing::debug!(connection_id = %conn.id, url, "memory connection created");
        self.connections.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}

/// An event the client emitted.
#[derive(Clone, Debug)]
pub struct Emitted {
    /// Event name.
    pub event: String,
    /// Payload.
    pub payload: Value,
    /// Acknowledgment the client attached, for the test to answer.
    pub ack: Option<Ack>,
}

/// Reply slot for [`MemoryConnection::deliver_with_ack`].
#[derive(Clone, Debug, Default)]
pub struct AckProbe {
    reply: Arc<Mutex<Option<Value>>>,
    /// Listeners that received the event.
    pub dispatched: usize,
}

impl AckProbe {
    /// The reply, if a listener acknowledged.
    pub fn reply(&self) -> Option<Value> {
        self.reply.lock().clone()
    }
}

/// Caller-driven [`Connection`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    url: String,
    listeners: ListenerTable,
    started: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    emitted: Mutex<Vec<Emitted>>,
    disconnect_calls: AtomicUsize,
}

impl MemoryConnection {
    fn new(url: &str) -> Self {
        Self {
            id: ConnectionId::new(),
            url: url.to_owned(),
            listeners: ListenerTable::new(),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// URL passed to `connect`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Mark the connection open and fire `connect`.
    pub fn open(&self) -> usize {
        self.connected.store(true, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        self.listeners.dispatch(CONNECT, &Value::Null, None)
    }

    /// Simulate the peer dropping the socket: fire `disconnect` if open.
    pub fn drop_connection(&self) -> usize {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.listeners
                .dispatch(DISCONNECT, &Value::from("transport close"), None)
        } else {
            0
        }
    }

    /// Simulate a successful adapter retry: `reconnecting`, `connect`, `reconnect`.
    pub fn reconnect(&self) {
        let _ = self.listeners.dispatch(RECONNECTING, &Value::from(1), None);
        let _ = self.open();
        let _ = self.listeners.dispatch(RECONNECT, &Value::from(1), None);
    }

    /// Fire a lifecycle event without changing connection state.
    pub fn fire(&self, event: LifecycleEvent) -> usize {
        self.listeners.dispatch(event.as_str(), &Value::Null, None)
    }

    /// Deliver an inbound event without an acknowledgment. Returns how many
    /// subscribed listeners ran; the unhandled sink is not counted.
    pub fn deliver(&self, event: &str, payload: Value) -> usize {
        self.listeners.dispatch_inbound(event, &payload, None)
    }

    /// Deliver an inbound event that asks for an acknowledgment.
    pub fn deliver_with_ack(&self, event: &str, payload: Value) -> AckProbe {
        let reply = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reply);
        let ack = Ack::new(move |v: Value| *slot.lock() = Some(v));
        let dispatched = self.listeners.dispatch_inbound(event, &payload, Some(&ack));
        AckProbe { reply, dispatched }
    }

    /// Everything the client emitted, in order.
    pub fn emitted(&self) -> Vec<Emitted> {
        self.emitted.lock().clone()
    }

    /// How many times `disconnect` was called.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Whether the client called [`Connection::start`].
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether `close` has fired since the last `open`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn emit(&self, event: &str, payload: Value, ack: Option<Ack>) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.emitted.lock().push(Emitted {
            event: event.to_owned(),
            payload,
            ack,
        });
        true
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
        let _ = self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .listeners
                .dispatch(DISCONNECT, &Value::from("io client disconnect"), None);
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.listeners.dispatch(CLOSE, &Value::Null, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |_payload: Value, _ack: Option<Ack>| log.lock().push(name.to_owned()))
    }

    fn connected() -> (MemoryTransport, Arc<MemoryConnection>) {
        let transport = MemoryTransport::new();
        let _ = transport.connect("ws://localhost:80/").unwrap();
        let conn = transport.last_connection().unwrap();
        (transport, conn)
    }

    #[test]
    fn connect_records_connection() {
        let (transport, conn) = connected();
        assert_eq!(transport.connections().len(), 1);
        assert_eq!(conn.url(), "ws://localhost:80/");
        assert!(!conn.is_connected());
        assert!(!conn.is_started());
        conn.start();
        assert!(conn.is_started());
    }

    #[test]
    fn refused_connect_is_error() {
        let transport = MemoryTransport::new();
        transport.refuse_connections(true);
        assert_matches!(
            transport.connect("ws://x:1/"),
            Err(TransportError::InvalidUrl { .. })
        );
        assert!(transport.last_connection().is_none());
    }

    #[test]
    fn emit_requires_open_connection() {
        let (_t, conn) = connected();
        assert!(!conn.emit("chat", json!(1), None));
        let _ = conn.open();
        assert!(conn.emit("chat", json!(2), None));
        let sent = conn.emitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, "chat");
        assert_eq!(sent[0].payload, json!(2));
    }

    #[test]
    fn disconnect_fires_disconnect_then_close_once() {
        let (_t, conn) = connected();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = conn.on(DISCONNECT, recorder(&log, "disconnect"));
        let _ = conn.on(CLOSE, recorder(&log, "close"));
        let _ = conn.open();

        conn.disconnect();
        conn.disconnect();

        assert_eq!(*log.lock(), vec!["disconnect", "close"]);
        assert_eq!(conn.disconnect_calls(), 2);
        assert!(conn.is_closed());
    }

    #[test]
    fn drop_only_fires_when_open() {
        let (_t, conn) = connected();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _ = conn.on(DISCONNECT, recorder(&log, "disconnect"));
        assert_eq!(conn.drop_connection(), 0);
        let _ = conn.open();
        assert_eq!(conn.drop_connection(), 1);
        assert_eq!(conn.drop_connection(), 0);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn reconnect_sequence() {
        let (_t, conn) = connected();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (event, name) in [
            (RECONNECTING, "reconnecting"),
            (CONNECT, "connect"),
            (RECONNECT, "reconnect"),
        ] {
            let _ = conn.on(event, recorder(&log, name));
        }
        conn.reconnect();
        assert_eq!(*log.lock(), vec!["reconnecting", "connect", "reconnect"]);
        assert!(conn.is_connected());
    }

    #[test]
    fn deliver_with_ack_captures_reply() {
        let (_t, conn) = connected();
        let _ = conn.on(
            "whisk.auth.request",
            Arc::new(|_payload: Value, ack: Option<Ack>| {
                if let Some(ack) = ack {
                    let _ = ack.send(json!({ "ws_token": "T1" }));
                }
            }),
        );
        let probe = conn.deliver_with_ack("whisk.auth.request", json!({}));
        assert_eq!(probe.dispatched, 1);
        assert_eq!(probe.reply(), Some(json!({ "ws_token": "T1" })));

        let unheard = conn.deliver_with_ack("nobody.listens", Value::Null);
        assert_eq!(unheard.dispatched, 0);
        assert_eq!(unheard.reply(), None);
    }

    #[test]
    fn unsubscribed_delivery_reaches_the_unhandled_sink() {
        let (_t, conn) = connected();
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        conn.set_unhandled(Some(Arc::new(
            move |event: &str, _payload: Value, ack: Option<Ack>| {
                sink.lock().push(event.to_owned());
                if let Some(ack) = ack {
                    let _ = ack.send(json!("late"));
                }
            },
        )));

        let probe = conn.deliver_with_ack("whisk.auth.request", json!({}));
        assert_eq!(probe.dispatched, 0);
        assert_eq!(probe.reply(), Some(json!("late")));
        conn.reconnect();
        assert_eq!(*names.lock(), vec!["whisk.auth.request"]);
    }
}
