//! # whisk-core
//!
//! Shared vocabulary for the Whisk client crates.
//!
//! - **Branded IDs**: [`ConnectionId`], [`SessionId`] as newtypes, [`ListenerId`] for
//!   transport subscriptions
//! - **Logging**: [`logging::init_subscriber`] and the [`logging::capture_logs`] test helper

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{ConnectionId, ListenerId, SessionId};
