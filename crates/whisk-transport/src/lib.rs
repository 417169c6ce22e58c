//! # whisk-transport
//!
//! The duplex connection the session layer is built on.
//!
//! A [`Connection`] delivers named events to subscribed listeners, emits
//! named events with an optional acknowledgment callback, and reports its
//! own lifecycle through the reserved event names in [`events`].
//!
//! - [`ws::WsTransport`]: JSON event frames over `tokio-tungstenite`, with
//!   adapter-level reconnection ([`reconnect::ReconnectPolicy`])
//! - [`memory::MemoryTransport`]: in-process adapter driven by the caller,
//!   for tests and embedding

#![deny(unsafe_code)]

pub mod adapter;
pub mod errors;
pub mod events;
pub mod frame;
pub mod memory;
pub mod reconnect;
pub mod ws;

pub use adapter::{Ack, Connection, Listener, ListenerTable, Transport, UnhandledListener};
pub use errors::TransportError;
pub use events::LifecycleEvent;
pub use memory::{AckProbe, Emitted, MemoryConnection, MemoryTransport};
pub use reconnect::ReconnectPolicy;
pub use ws::{WsConnection, WsTransport};
