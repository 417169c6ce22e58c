//! Built-in base and protocol routes.
//!
//! | group    | route                | handler                                      |
//! |----------|----------------------|----------------------------------------------|
//! | base     | `disconnect`         | invalidate token, tear down all tiers        |
//! | base     | `reconnecting`       | log                                          |
//! | base     | `reconnect`          | log                                          |
//! | base     | `close`              | log                                          |
//! | protocol | `whisk.auth.request` | mark requested, ack `{"ws_token": token}`    |
//! | protocol | `whisk.auth.accept`  | mark accepted                                |
//! | protocol | `whisk.auth.error`   | mark auth error (no retry)                   |
//!
//! Every built-in route also has a callback that only logs.

use serde_json::json;
use tracing::{info, warn};
use whisk_auth::WsToken;
use whisk_transport::events::{CLOSE, DISCONNECT, RECONNECT, RECONNECTING};

use crate::context::RouteContext;
use crate::routes::{Inbound, RouteEvent, RouteGroup, RouteSpec};

/// Peer asks for the websocket token.
pub const AUTH_REQUEST: &str = "whisk.auth.request";
/// Peer accepted the token.
pub const AUTH_ACCEPT: &str = "whisk.auth.accept";
/// Peer rejected the token.
pub const AUTH_ERROR: &str = "whisk.auth.error";

/// The built-in routes, for seeding a registry.
pub fn builtin_routes() -> Vec<(RouteGroup, &'static str, RouteSpec)> {
    let entry = |group: RouteGroup, route: &'static str, h: fn(&mut RouteContext<'_>, Inbound)| {
        (group, route, RouteSpec::handler(h).with_callback(log_callback))
    };
    vec![
        entry(RouteGroup::Base, DISCONNECT, on_disconnect),
        entry(RouteGroup::Base, RECONNECTING, on_reconnecting),
        entry(RouteGroup::Base, RECONNECT, on_reconnect),
        entry(RouteGroup::Base, CLOSE, on_close),
        entry(RouteGroup::Protocol, AUTH_REQUEST, on_auth_request),
        entry(RouteGroup::Protocol, AUTH_ACCEPT, on_auth_accept),
        entry(RouteGroup::Protocol, AUTH_ERROR, on_auth_error),
    ]
}

/// Default callback.
pub fn log_callback(event: &RouteEvent) {
    info!(group = %event.group, route = %event.route, state = %event.state, "route callback");
}

/// `disconnect`: invalidate the token and tear down every tier.
pub fn on_disconnect(ctx: &mut RouteContext<'_>, inbound: Inbound) {
    info!(reason = %inbound.payload, "on websocket disconnect");
    ctx.handle_disconnect();
}

/// `reconnecting`
pub fn on_reconnecting(_ctx: &mut RouteContext<'_>, inbound: Inbound) {
    info!(attempt = %inbound.payload, "on websocket reconnecting");
}

/// `reconnect`. Re-activation waits for the transport's next `connect`.
pub fn on_reconnect(_ctx: &mut RouteContext<'_>, inbound: Inbound) {
    info!(attempts = %inbound.payload, "on websocket reconnect");
}

/// `close`
pub fn on_close(_ctx: &mut RouteContext<'_>, _inbound: Inbound) {
    info!("on websocket close");
}

/// `whisk.auth.request`: reply with the held token, or `null` when none is
/// held yet. The peer treats `null` as an auth failure.
pub fn on_auth_request(ctx: &mut RouteContext<'_>, inbound: Inbound) {
    info!(payload = %inbound.payload, "on whisk.auth.request");
    ctx.record_auth_request();
    let reply = json!({ "ws_token": ctx.token().map(WsToken::as_str) });
    if !inbound.reply(reply) {
        warn!("whisk.auth.request carried no ack, token not sent");
    }
}

/// `whisk.auth.accept`
pub fn on_auth_accept(ctx: &mut RouteContext<'_>, _inbound: Inbound) {
    info!("on whisk.auth.accept");
    ctx.record_auth_accept();
}

/// `whisk.auth.error`: recorded, not retried.
pub fn on_auth_error(ctx: &mut RouteContext<'_>, inbound: Inbound) {
    warn!(payload = %inbound.payload, "on whisk.auth.error");
    ctx.record_auth_error();
}
