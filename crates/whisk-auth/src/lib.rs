//! # whisk-auth
//!
//! The token side of the websocket handshake.
//!
//! - [`TokenService`]: renews the websocket token (`ws_token`) for the
//!   current HTTP session; [`HttpTokenService`] calls the renewal endpoint
//! - [`IdentitySource`]: who the hosting application believes is logged in,
//!   used to reject tokens issued for somebody else
//!
//! Authorization policy lives on the server. This crate only fetches and
//! binds tokens.

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod service;
pub mod types;

pub use errors::AuthError;
pub use identity::{IdentitySource, SharedIdentity, StaticIdentity};
pub use service::{HttpTokenService, TokenService};
pub use types::{Identity, TokenGrant, WsToken};
