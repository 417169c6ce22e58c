//! Route Registry: three independent tiers of route handlers.
//!
//! Each tier maps route names to a handler and, separately, to a callback
//! that runs after the handler. Registration only edits the maps;
//! [`RouteTable::activate`] snapshots the current handlers into transport
//! listeners, so edits made while a tier is active take effect on the next
//! activation.
//!
//! The base tier's lifecycle routes (`disconnect`, `reconnecting`,
//! `reconnect`, `close`) are never subscribed here. The session listens for
//! lifecycle events itself for the whole life of a connection and runs
//! those routes from its queue.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use whisk_core::ListenerId;
use whisk_transport::{Ack, Connection, LifecycleEvent, Listener};

use crate::context::RouteContext;
use crate::errors::SessionError;
use crate::state::SessionState;

/// One of the three route tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteGroup {
    /// Transport lifecycle routes (`disconnect`, `reconnecting`, ...).
    Base,
    /// Authentication handshake routes (`whisk.auth.*`).
    Protocol,
    /// Caller-defined business routes.
    Application,
}

impl RouteGroup {
    /// All tiers, in activation order.
    pub const ALL: [Self; 3] = [Self::Base, Self::Protocol, Self::Application];

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Protocol => "protocol",
            Self::Application => "application",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Base => 0,
            Self::Protocol => 1,
            Self::Application => 2,
        }
    }
}

impl fmt::Display for RouteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteGroup {
    type Err = SessionError;

    /// Accepts the canonical names plus the legacy `whisk` and `app` aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Self::Base),
            "protocol" | "whisk" => Ok(Self::Protocol),
            "application" | "app" => Ok(Self::Application),
            other => Err(SessionError::UnknownRouteGroup(other.to_owned())),
        }
    }
}

/// An inbound event as seen by a route handler.
#[derive(Clone, Debug)]
pub struct Inbound {
    /// Event payload.
    pub payload: Value,
    /// Acknowledgment requested by the peer, if any.
    pub ack: Option<Ack>,
}

impl Inbound {
    /// Build an inbound event.
    pub fn new(payload: Value, ack: Option<Ack>) -> Self {
        Self { payload, ack }
    }

    /// Answer the peer's acknowledgment. Returns `false` if none was
    /// requested or it was already answered.
    pub fn reply(&self, payload: Value) -> bool {
        self.ack.as_ref().is_some_and(|ack| ack.send(payload))
    }
}

/// What a route callback is told after its handler ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEvent {
    /// Tier of the route.
    pub group: RouteGroup,
    /// Route name.
    pub route: String,
    /// Session state after the handler.
    pub state: SessionState,
}

/// Route handler, invoked for every inbound event on its route.
pub type Handler = Arc<dyn Fn(&mut RouteContext<'_>, Inbound) + Send + Sync>;

/// Post-handler callback. Informational: it cannot affect the handler.
pub type Callback = Arc<dyn Fn(&RouteEvent) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut RouteContext<'_>, Inbound) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&RouteEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler and/or callback for one route. Absent parts leave the current
/// registration alone.
#[derive(Clone, Default)]
pub struct RouteSpec {
    /// Replaces the route's handler.
    pub handler: Option<Handler>,
    /// Replaces the route's callback.
    pub callback: Option<Callback>,
}

impl RouteSpec {
    /// A spec that only sets the handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&mut RouteContext<'_>, Inbound) + Send + Sync + 'static,
    {
        Self {
            handler: Some(handler(f)),
            callback: None,
        }
    }

    /// A spec that only sets the callback.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&RouteEvent) + Send + Sync + 'static,
    {
        Self {
            handler: None,
            callback: Some(callback(f)),
        }
    }

    /// Also set the callback.
    #[must_use]
    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&RouteEvent) + Send + Sync + 'static,
    {
        self.callback = Some(callback(f));
        self
    }
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("handler", &self.handler.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Builds the transport listener for one route at activation time.
///
/// Arguments: route name, activation id, handler, callback.
pub(crate) type ListenerFactory<'a> =
    dyn FnMut(&str, u64, Handler, Option<Callback>) -> Listener + 'a;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Initializing,
    TearingDown,
}

/// One tier's handlers, callbacks and live subscriptions.
pub struct RouteTable {
    group: RouteGroup,
    handlers: BTreeMap<String, Handler>,
    callbacks: BTreeMap<String, Callback>,
    subscriptions: Vec<(String, ListenerId)>,
    live: BTreeMap<String, (Handler, Option<Callback>)>,
    phase: Phase,
    activation: Option<u64>,
    next_activation: u64,
}

impl RouteTable {
    fn new(group: RouteGroup) -> Self {
        Self {
            group,
            handlers: BTreeMap::new(),
            callbacks: BTreeMap::new(),
            subscriptions: Vec::new(),
            live: BTreeMap::new(),
            phase: Phase::Idle,
            activation: None,
            next_activation: 1,
        }
    }

    /// Insert or replace the route's handler and/or callback.
    pub fn register(&mut self, route: &str, spec: RouteSpec) {
        let group = self.group;
        if let Some(h) = spec.handler {
            if self.handlers.insert(route.to_owned(), h).is_some() {
                info!(%group, route, "overload route");
            } else {
                info!(%group, route, "define route");
            }
        }
        if let Some(cb) = spec.callback {
            if self.callbacks.insert(route.to_owned(), cb).is_some() {
                info!(%group, route, "overload the cb for route");
            } else {
                info!(%group, route, "define cb for route");
            }
        }
    }

    /// Route names with a handler, in activation order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Whether `route` has a handler.
    pub fn has_handler(&self, route: &str) -> bool {
        self.handlers.contains_key(route)
    }

    /// Whether `route` has a callback.
    pub fn has_callback(&self, route: &str) -> bool {
        self.callbacks.contains_key(route)
    }

    pub(crate) fn handler(&self, route: &str) -> Option<Handler> {
        self.handlers.get(route).cloned()
    }

    pub(crate) fn callback(&self, route: &str) -> Option<Callback> {
        self.callbacks.get(route).cloned()
    }

    /// Whether the tier is subscribed to a connection.
    pub fn is_active(&self) -> bool {
        self.activation.is_some()
    }

    /// Whether listeners built for `activation` are still subscribed.
    pub(crate) fn is_live(&self, activation: u64) -> bool {
        self.activation == Some(activation)
    }

    /// Handler and callback `route` was subscribed with, if the tier is
    /// active and the route is part of the current activation.
    pub(crate) fn subscribed(&self, route: &str) -> Option<(Handler, Option<Callback>)> {
        self.live.get(route).cloned()
    }

    /// Subscribe one listener per registered route, replacing any earlier
    /// subscriptions of this tier. Returns the number of routes subscribed.
    pub(crate) fn activate(
        &mut self,
        conn: &dyn Connection,
        make_listener: &mut ListenerFactory<'_>,
    ) -> usize {
        let group = self.group;
        if self.phase != Phase::Idle {
            warn!(%group, phase = ?self.phase, "reentrant route activation ignored");
            return 0;
        }
        self.phase = Phase::Initializing;
        info!(%group, "initialize routes");

        self.unsubscribe(conn);
        let activation = self.next_activation;
        self.next_activation += 1;

        for (route, h) in &self.handlers {
            if LifecycleEvent::is_reserved(route) {
                continue;
            }
            let cb = self.callbacks.get(route).cloned();
            let listener = make_listener(route, activation, Arc::clone(h), cb.clone());
            let id = conn.on(route, listener);
            debug!(%group, route = %route, listener = %id, "listen on route");
            self.subscriptions.push((route.clone(), id));
            let _ = self.live.insert(route.clone(), (Arc::clone(h), cb));
        }
        self.activation = Some(activation);

        self.phase = Phase::Idle;
        self.subscriptions.len()
    }

    /// Remove every subscription of this tier. Returns how many were removed.
    pub(crate) fn deactivate(&mut self, conn: &dyn Connection) -> usize {
        let group = self.group;
        if self.phase != Phase::Idle {
            warn!(%group, phase = ?self.phase, "reentrant route teardown ignored");
            return 0;
        }
        self.phase = Phase::TearingDown;
        let removed = self.unsubscribe(conn);
        self.activation = None;
        if removed > 0 {
            info!(%group, removed, "tear down routes");
        }
        self.phase = Phase::Idle;
        removed
    }

    /// Drop subscriptions that belonged to a connection that is gone.
    pub(crate) fn forget_subscriptions(&mut self) {
        self.subscriptions.clear();
        self.live.clear();
        self.activation = None;
    }

    fn unsubscribe(&mut self, conn: &dyn Connection) -> usize {
        let group = self.group;
        let mut removed = 0;
        self.live.clear();
        for (route, id) in self.subscriptions.drain(..) {
            if conn.remove_listener(&route, id) {
                removed += 1;
                debug!(%group, route = %route, "removed handler for route");
            }
        }
        removed
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("group", &self.group)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("subscriptions", &self.subscriptions.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// The three route tiers.
#[derive(Debug)]
pub struct Registry {
    tables: [RouteTable; 3],
}

impl Registry {
    /// A registry with no routes at all.
    pub fn empty() -> Self {
        Self {
            tables: RouteGroup::ALL.map(RouteTable::new),
        }
    }

    /// A registry holding the built-in base and protocol routes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (group, route, spec) in crate::defaults::builtin_routes() {
            registry.register(group, route, spec);
        }
        registry
    }

    /// The table for `group`.
    pub fn table(&self, group: RouteGroup) -> &RouteTable {
        &self.tables[group.index()]
    }

    pub(crate) fn table_mut(&mut self, group: RouteGroup) -> &mut RouteTable {
        &mut self.tables[group.index()]
    }

    /// Insert or replace a route in `group`.
    pub fn register(&mut self, group: RouteGroup, route: &str, spec: RouteSpec) {
        self.table_mut(group).register(route, spec);
    }

    /// Like [`Registry::register`], with the group given by name.
    pub fn register_named(
        &mut self,
        group: &str,
        route: &str,
        spec: RouteSpec,
    ) -> crate::Result<()> {
        let group: RouteGroup = group.parse()?;
        self.register(group, route, spec);
        Ok(())
    }

    pub(crate) fn forget_subscriptions(&mut self) {
        for table in &mut self.tables {
            table.forget_subscriptions();
        }
    }
}
