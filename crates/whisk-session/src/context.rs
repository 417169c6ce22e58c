//! What a route handler can do to its session.

use serde_json::Value;
use whisk_auth::WsToken;
use whisk_transport::Ack;

use crate::routes::{RouteGroup, RouteSpec};
use crate::session::Core;
use crate::state::SessionState;

/// Exclusive access to the session for the duration of one handler call.
///
/// The built-in handlers in [`crate::defaults`] are written against this
/// API only, so a caller that overrides a built-in route can reproduce or
/// extend its behavior.
pub struct RouteContext<'a> {
    core: &'a mut Core,
    group: RouteGroup,
    route: &'a str,
}

impl<'a> RouteContext<'a> {
    pub(crate) fn new(core: &'a mut Core, group: RouteGroup, route: &'a str) -> Self {
        Self { core, group, route }
    }

    /// Tier of the route being handled.
    pub fn group(&self) -> RouteGroup {
        self.group
    }

    /// Name of the route being handled.
    pub fn route(&self) -> &str {
        self.route
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// The held token, if one is confirmed for this cycle.
    pub fn token(&self) -> Option<&WsToken> {
        self.core.token()
    }

    /// Send an event to the peer. Returns `false` when not connected.
    pub fn emit(&self, event: &str, payload: Value, ack: Option<Ack>) -> bool {
        self.core.emit(event, payload, ack)
    }

    /// Insert or replace a route; takes effect at the group's next activation.
    pub fn register(&mut self, group: RouteGroup, route: &str, spec: RouteSpec) {
        self.core.registry.register(group, route, spec);
    }

    /// Subscribe `group`'s routes to the connection.
    pub fn activate(&mut self, group: RouteGroup) -> usize {
        self.core.activate(group)
    }

    /// Unsubscribe `group`'s routes from the connection.
    pub fn deactivate(&mut self, group: RouteGroup) -> usize {
        self.core.deactivate(group)
    }

    /// Record that the peer asked for the token.
    pub fn record_auth_request(&mut self) {
        self.core.record_auth_request();
    }

    /// Record that the peer accepted the token.
    pub fn record_auth_accept(&mut self) {
        self.core.record_auth_accept();
    }

    /// Record a peer-reported auth failure. The token is invalidated and,
    /// if the session was ready, the application tier is torn down.
    pub fn record_auth_error(&mut self) {
        self.core.record_auth_error();
    }

    /// Invalidate the token, deactivate all three tiers and reset the
    /// handshake.
    pub fn handle_disconnect(&mut self) {
        self.core.handle_disconnect();
    }
}

impl std::fmt::Debug for RouteContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("group", &self.group)
            .field("route", &self.route)
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}
