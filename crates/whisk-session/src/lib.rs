//! # whisk-session
//!
//! Client session layer over a named-event duplex connection.
//!
//! - [`routes`]: Route Registry with three independent tiers (`base`,
//!   `protocol`, `application`), staged registration, bulk activation
//! - [`handshake`]: token reuse or renewal for each connect cycle
//! - [`state`]: explicit session state machine; `is_ready`, `auth_error`
//!   and friends are projections of it
//! - [`session`]: [`Session`] (`init`, `tear_down`, event loop) and
//!   [`SessionHandle`]
//! - [`defaults`]: built-in lifecycle and handshake routes
//! - [`setup`]: settings file, logging and collaborators in one step
//!
//! ## Connect cycle
//!
//! 1. `init` opens the transport.
//! 2. Transport `connect`: `base` and `protocol` activate, then the token is
//!    reused or renewed.
//! 3. Token bound to the current identity: `application` activates and
//!    `on_ready` runs.
//! 4. Transport `disconnect`: token invalidated, all tiers deactivated.
//!
//! Lifecycle events run the `base` routes of the same name from the
//! session's queue, whether or not the tier is subscribed at that moment.

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod defaults;
pub mod errors;
pub mod handshake;
pub mod routes;
pub mod session;
pub mod setup;
pub mod state;

pub use config::{RouteOverrides, SessionConfig};
pub use context::RouteContext;
pub use errors::{Result, SessionError};
pub use handshake::TokenState;
pub use routes::{
    Callback, Handler, Inbound, Registry, RouteEvent, RouteGroup, RouteSpec, RouteTable, callback,
    handler,
};
pub use session::{Session, SessionDeps, SessionHandle};
pub use setup::Setup;
pub use state::{Handshake, Input, SessionState};
