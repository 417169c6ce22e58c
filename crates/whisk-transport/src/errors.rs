//! Transport error types.
//!
//! Only setup problems are errors. A connection that drops after it was
//! opened is reported through the `disconnect` lifecycle event instead.

/// Errors returned when opening a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The URL could not be parsed.
    #[error("invalid transport URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The URL scheme is not `ws` or `wss`.
    #[error("unsupported transport scheme: {0}")]
    UnsupportedScheme(String),

    /// The adapter needs a Tokio runtime and none is running.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}
