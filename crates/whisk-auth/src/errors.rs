//! Auth error types.

/// Errors that can occur while renewing a websocket token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The renewal endpoint answered with a non-success status.
    #[error("token renewal failed ({status}): {message}")]
    Renewal {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The renewal response carried no `ws_token`.
    #[error("token renewal response carried no ws_token")]
    MissingToken,
}
