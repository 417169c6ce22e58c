//! Session error types.
//!
//! Only setup mistakes are errors. Transport drops, handshake failures and
//! token-service failures are runtime conditions: they are logged and show
//! up in [`SessionState`](crate::SessionState) and route callbacks.

use whisk_auth::AuthError;
use whisk_settings::SettingsError;
use whisk_transport::TransportError;

/// Errors returned by session setup calls.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A route was registered under a group name that does not exist.
    #[error("unknown route group: {0} (expected base, protocol or application)")]
    UnknownRouteGroup(String),

    /// `init` was called while the session is still running.
    #[error("session already initialized; call tear_down first")]
    AlreadyInitialized,

    /// The transport refused to create a connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The token service could not be built.
    #[error("token service error: {0}")]
    Auth(#[from] AuthError),

    /// The settings file could not be loaded.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
