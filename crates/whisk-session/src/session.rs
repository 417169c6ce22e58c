//! The session: owns the connection, the route registry, the handshake
//! and the state machine, and processes every transport event in order.
//!
//! Transport listeners never run session code directly. They push an
//! [`Envelope`] onto the session's queue, and the owner of the [`Session`]
//! drains that queue with [`Session::run`], [`Session::process_next`] or
//! [`Session::process_pending`]. Route handlers therefore run one at a time,
//! in delivery order, with exclusive access to the session.
//!
//! Lifecycle events and peer events nobody is subscribed to yet share that
//! queue. A peer event that arrives before the queued `connect` has
//! activated its tier is resolved when it is processed, after the `connect`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whisk_auth::{
    AuthError, HttpTokenService, IdentitySource, TokenGrant, TokenService, WsToken,
};
use whisk_core::{ListenerId, SessionId};
use whisk_settings::ClientSettings;
use whisk_transport::events::DISCONNECT;
use whisk_transport::{
    Ack, Connection, LifecycleEvent, Listener, Transport, UnhandledListener, WsTransport,
};

use crate::config::{RouteOverrides, SessionConfig};
use crate::context::RouteContext;
use crate::errors::{Result, SessionError};
use crate::handshake::{self, GrantDecision, RenewalTag, TokenState};
use crate::routes::{Callback, Handler, Inbound, Registry, RouteEvent, RouteGroup, RouteSpec};
use crate::state::{Input, SessionState};

/// Work item on the session queue.
pub(crate) enum Envelope {
    /// A transport lifecycle event observed by the session itself.
    Lifecycle {
        generation: SessionId,
        event: LifecycleEvent,
        payload: Value,
    },
    /// An inbound event on an activated route.
    Route(Delivery),
    /// An inbound event that found no subscribed route on arrival.
    Unrouted {
        generation: SessionId,
        route: String,
        inbound: Inbound,
    },
    /// A token renewal finished.
    Renewed {
        tag: RenewalTag,
        result: std::result::Result<TokenGrant, AuthError>,
    },
    /// Requested through a [`SessionHandle`].
    TearDown,
}

/// An inbound event together with the handler snapshot taken at activation.
pub(crate) struct Delivery {
    generation: SessionId,
    group: RouteGroup,
    activation: u64,
    route: String,
    inbound: Inbound,
    handler: Handler,
    callback: Option<Callback>,
}

/// Collaborators a session is built on.
#[derive(Clone)]
pub struct SessionDeps {
    /// Opens the duplex connection.
    pub transport: Arc<dyn Transport>,
    /// Issues websocket tokens.
    pub token_service: Arc<dyn TokenService>,
    /// Who the hosting application believes is logged in.
    pub identity: Arc<dyn IdentitySource>,
}

impl SessionDeps {
    /// Bundle the collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        token_service: Arc<dyn TokenService>,
        identity: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            transport,
            token_service,
            identity,
        }
    }

    /// WebSocket transport and HTTP token service configured from settings.
    pub fn from_settings(
        settings: &ClientSettings,
        identity: Arc<dyn IdentitySource>,
    ) -> Result<Self> {
        let token_service = HttpTokenService::new(&settings.token_service)?;
        Ok(Self::new(
            Arc::new(WsTransport::from_settings(&settings.transport)),
            Arc::new(token_service),
            identity,
        ))
    }
}

impl fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDeps").finish_non_exhaustive()
    }
}

type OnReady = Box<dyn FnMut() + Send>;

/// Everything a route handler may touch through [`RouteContext`].
pub(crate) struct Core {
    deps: SessionDeps,
    pub(crate) registry: Registry,
    connection: Option<Arc<dyn Connection>>,
    lifecycle: Vec<(LifecycleEvent, ListenerId)>,
    state: SessionState,
    token: TokenState,
    generation: Option<SessionId>,
    epoch: u64,
    ready_epoch: Option<u64>,
    renewal: Option<CancellationToken>,
    on_ready: Option<OnReady>,
    running: bool,
    tx: mpsc::UnboundedSender<Envelope>,
    status: watch::Sender<SessionState>,
}

impl Core {
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn token(&self) -> Option<&WsToken> {
        self.token.token()
    }

    pub(crate) fn emit(&self, event: &str, payload: Value, ack: Option<Ack>) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.emit(event, payload, ack))
    }

    /// Apply `input`; returns whether the state changed.
    pub(crate) fn transition(&mut self, input: Input) -> bool {
        match self.state.next(input) {
            Some(next) => {
                info!(from = %self.state, to = %next, ?input, "session state");
                self.state = next;
                let _ = self.status.send_replace(next);
                true
            }
            None => {
                debug!(state = %self.state, ?input, "input has no effect");
                false
            }
        }
    }

    pub(crate) fn activate(&mut self, group: RouteGroup) -> usize {
        let (Some(conn), Some(generation)) = (self.connection.clone(), self.generation.clone())
        else {
            debug!(%group, "no connection, activation skipped");
            return 0;
        };
        let tx = self.tx.clone();
        let mut make_listener = move |route: &str,
                                      activation: u64,
                                      handler: Handler,
                                      callback: Option<Callback>|
              -> Listener {
            let tx = tx.clone();
            let generation = generation.clone();
            let route = route.to_owned();
            Arc::new(move |payload: Value, ack: Option<Ack>| {
                let _ = tx.send(Envelope::Route(Delivery {
                    generation: generation.clone(),
                    group,
                    activation,
                    route: route.clone(),
                    inbound: Inbound::new(payload, ack),
                    handler: Arc::clone(&handler),
                    callback: callback.clone(),
                }));
            })
        };
        self.registry
            .table_mut(group)
            .activate(conn.as_ref(), &mut make_listener)
    }

    pub(crate) fn deactivate(&mut self, group: RouteGroup) -> usize {
        let Some(conn) = self.connection.clone() else {
            debug!(%group, "no connection, deactivation skipped");
            return 0;
        };
        self.registry.table_mut(group).deactivate(conn.as_ref())
    }

    pub(crate) fn record_auth_request(&mut self) {
        let _ = self.transition(Input::AuthRequested);
    }

    pub(crate) fn record_auth_accept(&mut self) {
        let _ = self.transition(Input::AuthAccepted);
    }

    /// The peer rejected us. No retry until the next connect cycle; a token
    /// stops being valid the moment an auth error is recorded.
    pub(crate) fn record_auth_error(&mut self) {
        let was_ready = self.state.is_ready();
        if !self.transition(Input::AuthError) {
            return;
        }
        self.cancel_renewal();
        self.token = TokenState::NoToken;
        if was_ready {
            let removed = self.deactivate(RouteGroup::Application);
            info!(removed, "auth error while ready, application routes torn down");
        }
    }

    /// Invalidate the token, unsubscribe every tier and reset the state.
    pub(crate) fn handle_disconnect(&mut self) {
        self.cancel_renewal();
        self.token = TokenState::NoToken;
        for group in RouteGroup::ALL {
            let _ = self.deactivate(group);
        }
        let _ = self.transition(Input::TransportDisconnected);
    }

    fn cancel_renewal(&mut self) {
        if let Some(cancel) = self.renewal.take() {
            cancel.cancel();
        }
    }

    /// Whether events tagged with `generation` belong to the open connection.
    fn is_current(&self, generation: &SessionId) -> bool {
        self.connection.is_some() && self.generation.as_ref() == Some(generation)
    }

    fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Lifecycle {
                generation,
                event,
                payload,
            } => {
                // While tearing down only the closing events still count.
                let closing =
                    matches!(event, LifecycleEvent::Disconnect | LifecycleEvent::Close);
                if !self.is_current(&generation) || !(self.running || closing) {
                    debug!(%event, "stale lifecycle event dropped");
                    return;
                }
                self.on_lifecycle(event, payload);
            }
            Envelope::Route(delivery) => self.deliver(delivery),
            Envelope::Unrouted {
                generation,
                route,
                inbound,
            } => {
                if !self.running || !self.is_current(&generation) {
                    debug!(%route, "inbound event for a closed session dropped");
                    return;
                }
                self.deliver_unrouted(&route, &inbound);
            }
            Envelope::Renewed { tag, result } => self.on_renewed(&tag, result),
            Envelope::TearDown => {}
        }
    }

    /// `connect` drives the cycle; the other four run their base route.
    fn on_lifecycle(&mut self, event: LifecycleEvent, payload: Value) {
        match event {
            LifecycleEvent::Connect => {
                self.on_connect();
                return;
            }
            LifecycleEvent::Reconnecting => {
                let _ = self.transition(Input::TransportReconnecting);
            }
            LifecycleEvent::Close => warn!("transport closed and will not reconnect"),
            LifecycleEvent::Disconnect | LifecycleEvent::Reconnect => {}
        }
        self.run_registered(RouteGroup::Base, event.as_str(), Inbound::new(payload, None));
    }

    #[tracing::instrument(skip_all, fields(epoch = self.epoch + 1))]
    fn on_connect(&mut self) {
        self.epoch += 1;
        self.cancel_renewal();
        let _ = self.transition(Input::TransportConnected);

        let base = self.activate(RouteGroup::Base);
        let protocol = self.activate(RouteGroup::Protocol);
        if self.registry.table(RouteGroup::Application).is_active() {
            let _ = self.deactivate(RouteGroup::Application);
        }
        info!(base, protocol, "websocket connected, base and protocol routes active");

        if self.token.token().is_some() {
            info!("reusing held ws token");
            self.confirm_token();
        } else {
            self.start_renewal();
        }
    }

    fn start_renewal(&mut self) {
        let Some(generation) = self.generation.clone() else {
            return;
        };
        info!("no ws token held, renewing");
        let tag = RenewalTag {
            generation,
            epoch: self.epoch,
        };
        match handshake::spawn_renewal(
            Arc::clone(&self.deps.token_service),
            self.tx.clone(),
            tag,
        ) {
            Some(cancel) => {
                self.token = TokenState::Pending;
                self.renewal = Some(cancel);
            }
            None => {
                warn!("no tokio runtime, token renewal skipped");
                self.token = TokenState::Error;
            }
        }
    }

    fn on_renewed(&mut self, tag: &RenewalTag, result: std::result::Result<TokenGrant, AuthError>) {
        let current = tag.matches(self.generation.as_ref(), self.epoch);
        if !self.running || !current || !matches!(self.state, SessionState::Connected(_)) {
            debug!(epoch = tag.epoch, state = %self.state, "stale token renewal discarded");
            return;
        }
        self.renewal = None;

        let expected = self.deps.identity.current_identity();
        match handshake::evaluate(result, expected) {
            GrantDecision::Accept(token) => {
                info!("ws token renewed and bound to the current identity");
                self.token = TokenState::Confirmed(token);
                self.confirm_token();
            }
            GrantDecision::IdentityMismatch { issued, expected } => {
                info!(?issued, ?expected, "ws token issued for another identity, discarded");
                self.token = TokenState::NoToken;
            }
            GrantDecision::Failed(error) => {
                warn!(error = %error, "ws token renewal failed, no token this cycle");
                self.token = TokenState::Error;
            }
        }
    }

    fn confirm_token(&mut self) {
        if !self.transition(Input::TokenConfirmed) {
            return;
        }
        let routes = self.activate(RouteGroup::Application);
        info!(routes, "application routes active, session ready");
        if self.ready_epoch != Some(self.epoch) {
            self.ready_epoch = Some(self.epoch);
            if let Some(on_ready) = self.on_ready.as_mut() {
                on_ready();
            }
        }
    }

    fn deliver(&mut self, d: Delivery) {
        let live = self.generation.as_ref() == Some(&d.generation)
            && self.registry.table(d.group).is_live(d.activation);
        if !live {
            debug!(group = %d.group, route = %d.route, "route no longer active, event dropped");
            return;
        }
        self.run_route(d.group, &d.route, d.inbound, &d.handler, d.callback.as_ref());
    }

    /// Resolve a late inbound event against the tiers active now.
    fn deliver_unrouted(&mut self, route: &str, inbound: &Inbound) {
        if LifecycleEvent::is_reserved(route) {
            return;
        }
        let targets: Vec<_> = RouteGroup::ALL
            .into_iter()
            .filter_map(|group| {
                let (handler, callback) = self.registry.table(group).subscribed(route)?;
                Some((group, handler, callback))
            })
            .collect();
        if targets.is_empty() {
            debug!(route, "no active route for inbound event, dropped");
            return;
        }
        for (group, handler, callback) in targets {
            self.run_route(group, route, inbound.clone(), &handler, callback.as_ref());
        }
    }

    /// Run a route's current registration directly, outside the queue.
    fn run_registered(&mut self, group: RouteGroup, route: &str, inbound: Inbound) {
        let table = self.registry.table(group);
        let (Some(handler), callback) = (table.handler(route), table.callback(route)) else {
            return;
        };
        self.run_route(group, route, inbound, &handler, callback.as_ref());
    }

    fn run_route(
        &mut self,
        group: RouteGroup,
        route: &str,
        inbound: Inbound,
        handler: &Handler,
        callback: Option<&Callback>,
    ) {
        debug!(%group, route, "route");
        {
            let mut ctx = RouteContext::new(self, group, route);
            handler(&mut ctx, inbound);
        }
        if let Some(callback) = callback {
            callback(&RouteEvent {
                group,
                route: route.to_owned(),
                state: self.state,
            });
        }
    }

    fn merge_routes(&mut self, routes: RouteOverrides) {
        for (group, entries) in routes.into_groups() {
            for (route, spec) in entries {
                self.registry.register(group, &route, spec);
            }
        }
    }
}

/// A client session over one transport connection at a time.
///
/// ```text
/// let mut session = Session::new(deps);
/// session.init(config, || println!("ready"))?;
/// session.run().await;   // until tear_down
/// ```
pub struct Session {
    core: Core,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Session {
    /// Create a stopped session with the built-in base and protocol routes.
    pub fn new(deps: SessionDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionState::Disconnected);
        Self {
            core: Core {
                deps,
                registry: Registry::with_defaults(),
                connection: None,
                lifecycle: Vec::new(),
                state: SessionState::Disconnected,
                token: TokenState::NoToken,
                generation: None,
                epoch: 0,
                ready_epoch: None,
                renewal: None,
                on_ready: None,
                running: false,
                tx,
                status,
            },
            rx,
        }
    }

    /// A cloneable handle for other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.core.tx.clone(),
            state: self.core.status.subscribe(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.core.state
    }

    /// The held token, if confirmed.
    pub fn token(&self) -> Option<&WsToken> {
        self.core.token()
    }

    /// Token progress for this cycle.
    pub fn token_state(&self) -> &TokenState {
        &self.core.token
    }

    /// Generation minted by the latest `init`.
    pub fn generation(&self) -> Option<&SessionId> {
        self.core.generation.as_ref()
    }

    /// The current connection.
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.core.connection.as_ref()
    }

    /// The route registry.
    pub fn registry(&self) -> &Registry {
        &self.core.registry
    }

    /// Whether `init` ran and `tear_down` has not.
    pub fn is_running(&self) -> bool {
        self.core.running
    }

    /// Whether `group` is subscribed to the connection.
    pub fn is_active(&self, group: RouteGroup) -> bool {
        self.core.registry.table(group).is_active()
    }

    /// Insert or replace a route. Takes effect at the group's next
    /// activation.
    pub fn register(&mut self, group: RouteGroup, route: &str, spec: RouteSpec) {
        self.core.registry.register(group, route, spec);
    }

    /// Like [`Session::register`], with the group given by name.
    pub fn register_named(&mut self, group: &str, route: &str, spec: RouteSpec) -> Result<()> {
        self.core.registry.register_named(group, route, spec)
    }

    /// Subscribe `group`'s routes to the connection.
    pub fn activate(&mut self, group: RouteGroup) -> usize {
        self.core.activate(group)
    }

    /// Unsubscribe `group`'s routes from the connection.
    pub fn deactivate(&mut self, group: RouteGroup) -> usize {
        self.core.deactivate(group)
    }

    /// Merge `config` into the registry and open a connection.
    ///
    /// `on_ready` runs once per connect cycle that reaches
    /// [`SessionState::Ready`]. Every call mints a new generation, so work
    /// started for an earlier one is discarded.
    #[tracing::instrument(skip_all, fields(port = config.transport.port))]
    pub fn init(
        &mut self,
        config: SessionConfig,
        on_ready: impl FnMut() + Send + 'static,
    ) -> Result<SessionId> {
        if self.core.running {
            return Err(SessionError::AlreadyInitialized);
        }
        let url = config.transport.url();
        let conn = self.core.deps.transport.connect(&url)?;
        let generation = SessionId::new();

        self.core.registry.forget_subscriptions();
        self.core.merge_routes(config.routes);
        if let Some(token) = config.token {
            self.core.token = TokenState::Confirmed(token);
        }

        for event in LifecycleEvent::ALL {
            let tx = self.core.tx.clone();
            let tagged = generation.clone();
            let id = conn.on(
                event.as_str(),
                Arc::new(move |payload: Value, _ack: Option<Ack>| {
                    let _ = tx.send(Envelope::Lifecycle {
                        generation: tagged.clone(),
                        event,
                        payload,
                    });
                }),
            );
            self.core.lifecycle.push((event, id));
        }
        let tx = self.core.tx.clone();
        let tagged = generation.clone();
        let unhandled: UnhandledListener =
            Arc::new(move |route: &str, payload: Value, ack: Option<Ack>| {
                let _ = tx.send(Envelope::Unrouted {
                    generation: tagged.clone(),
                    route: route.to_owned(),
                    inbound: Inbound::new(payload, ack),
                });
            });
        conn.set_unhandled(Some(unhandled));

        self.core.connection = Some(Arc::clone(&conn));
        self.core.generation = Some(generation.clone());
        self.core.ready_epoch = None;
        self.core.on_ready = Some(Box::new(on_ready));
        self.core.running = true;
        let _ = self.core.transition(Input::Init);
        info!(%url, %generation, "session initialized, establishing websocket connection");

        conn.start();
        Ok(generation)
    }

    /// Close the connection. Idempotent.
    ///
    /// Events the transport reports synchronously (an in-process adapter's
    /// `disconnect`) are processed first. If the `base` tier is still active
    /// afterwards, its `disconnect` route runs directly, so the handler and
    /// callback see the close even when the transport reports it later.
    #[tracing::instrument(skip_all)]
    pub fn tear_down(&mut self) {
        if !self.core.running {
            debug!("tear_down on a stopped session");
            return;
        }
        info!("session tear down");
        self.core.running = false;
        self.core.cancel_renewal();

        let Some(conn) = self.core.connection.clone() else {
            return;
        };
        conn.disconnect();
        let _ = self.process_pending();

        if self.core.registry.table(RouteGroup::Base).is_active() {
            self.core.run_registered(
                RouteGroup::Base,
                DISCONNECT,
                Inbound::new(Value::from("io client disconnect"), None),
            );
        }
        self.core.handle_disconnect();

        for (event, id) in self.core.lifecycle.drain(..) {
            let _ = conn.remove_listener(event.as_str(), id);
        }
        conn.set_unhandled(None);
        self.core.connection = None;
        self.core.on_ready = None;
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::TearDown => self.tear_down(),
            other => self.core.handle(other),
        }
    }

    /// Wait for the next queued event and process it. Returns `false` if
    /// the queue is closed.
    pub async fn process_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(envelope) => {
                self.dispatch(envelope);
                true
            }
            None => false,
        }
    }

    /// Process every event already queued. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            self.dispatch(envelope);
            processed += 1;
        }
        processed
    }

    /// Process events until the session is torn down. Returns immediately
    /// if the session was never initialized.
    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) {
        while self.core.running {
            if !self.process_next().await {
                break;
            }
        }
        let _ = self.process_pending();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.core.state)
            .field("token", &self.core.token.name())
            .field("generation", &self.core.generation)
            .field("epoch", &self.core.epoch)
            .field("running", &self.core.running)
            .field("registry", &self.core.registry)
            .finish_non_exhaustive()
    }
}

/// Cloneable remote control for a [`Session`] owned by another task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Ask the session to tear down. Returns `false` if the session is gone.
    pub fn tear_down(&self) -> bool {
        self.tx.send(Envelope::TearDown).is_ok()
    }

    /// Latest published state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that wakes on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
