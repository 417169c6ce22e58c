//! Transport Adapter traits and the listener table shared by adapters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use whisk_core::{ConnectionId, ListenerId};

use crate::errors::TransportError;

type AckFn = Box<dyn FnOnce(Value) + Send>;

/// Acknowledgment callback attached to an event.
///
/// Cloneable so every listener of an event can see it, but only the first
/// [`Ack::send`] is delivered.
#[derive(Clone)]
pub struct Ack(Arc<Mutex<Option<AckFn>>>);

impl Ack {
    /// Wrap a reply function.
    pub fn new(f: impl FnOnce(Value) + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    /// Reply with `payload`. Returns `false` if a reply was already sent.
    pub fn send(&self, payload: Value) -> bool {
        let f = self.0.lock().take();
        match f {
            Some(f) => {
                f(payload);
                true
            }
            None => false,
        }
    }

    /// Whether a reply has been sent.
    pub fn is_spent(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack").field("spent", &self.is_spent()).finish()
    }
}

/// A listener invoked with the event payload and its ack, if the sender
/// asked for one.
pub type Listener = Arc<dyn Fn(Value, Option<Ack>) + Send + Sync>;

/// Receives inbound peer events that had no listener, with the event name.
pub type UnhandledListener = Arc<dyn Fn(&str, Value, Option<Ack>) + Send + Sync>;

/// Opens duplex connections.
pub trait Transport: Send + Sync {
    /// Create a connection to `url` without starting any I/O.
    ///
    /// Subscribe listeners, then call [`Connection::start`]; the `connect`
    /// lifecycle event fires once the connection is actually open.
    fn connect(&self, url: &str) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A duplex, named-event connection.
pub trait Connection: Send + Sync {
    /// Identifier for logs.
    fn id(&self) -> &ConnectionId;

    /// Begin connecting. Calls after the first are ignored.
    fn start(&self);

    /// Send a named event. Returns `false` if the connection is not open.
    fn emit(&self, event: &str, payload: Value, ack: Option<Ack>) -> bool;

    /// Subscribe `listener` to `event`.
    fn on(&self, event: &str, listener: Listener) -> ListenerId;

    /// Unsubscribe a listener. Returns `false` if it was not subscribed.
    fn remove_listener(&self, event: &str, id: ListenerId) -> bool;

    /// Number of listeners subscribed to `event`.
    fn listener_count(&self, event: &str) -> usize;

    /// Hand inbound peer events nobody is subscribed to over to `sink`,
    /// replacing any earlier sink. `None` drops them again. Lifecycle
    /// events never reach the sink.
    fn set_unhandled(&self, sink: Option<UnhandledListener>);

    /// Whether the underlying socket is currently open.
    fn is_connected(&self) -> bool;

    /// Close the connection and stop reconnecting. Idempotent.
    fn disconnect(&self);
}

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", self.id()).finish()
    }
}

/// Per-connection listener registrations, in subscription order.
#[derive(Default)]
pub struct ListenerTable {
    inner: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    unhandled: Mutex<Option<UnhandledListener>>,
}

impl ListenerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener and return its id.
    pub fn add(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .lock()
            .entry(event.to_owned())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener by id.
    pub fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(list) = inner.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = inner.remove(event);
        }
        removed
    }

    /// Number of listeners for `event`.
    pub fn count(&self, event: &str) -> usize {
        self.inner.lock().get(event).map_or(0, Vec::len)
    }

    /// Invoke every listener of `event`, returning how many ran.
    ///
    /// Listeners are cloned out first, so a listener may subscribe or
    /// unsubscribe without deadlocking.
    pub fn dispatch(&self, event: &str, payload: &Value, ack: Option<&Ack>) -> usize {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener(payload.clone(), ack.cloned());
        }
        listeners.len()
    }

    /// Like [`ListenerTable::dispatch`] for an event from the peer: with no
    /// listener subscribed, the event goes to the unhandled sink instead.
    /// Returns how many subscribed listeners ran.
    pub fn dispatch_inbound(&self, event: &str, payload: &Value, ack: Option<&Ack>) -> usize {
        let delivered = self.dispatch(event, payload, ack);
        if delivered == 0 {
            let sink = self.unhandled.lock().clone();
            match sink {
                Some(sink) => sink(event, payload.clone(), ack.cloned()),
                None => debug!(event, "no listener for inbound event"),
            }
        }
        delivered
    }

    /// Install or remove the unhandled sink.
    pub fn set_unhandled(&self, sink: Option<UnhandledListener>) {
        *self.unhandled.lock() = sink;
    }

    /// Drop all listeners and the unhandled sink.
    pub fn clear(&self) {
        self.inner.lock().clear();
        *self.unhandled.lock() = None;
    }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let mut counts: Vec<(&str, usize)> =
            inner.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        counts.sort_unstable();
        f.debug_struct("ListenerTable")
            .field("events", &counts)
            .field("unhandled", &self.unhandled.lock().is_some())
            .finish()
    }
}
