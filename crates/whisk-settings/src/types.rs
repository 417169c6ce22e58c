//! Settings type definitions.
//!
//! All types use camelCase field names and `#[serde(default)]`, so partial
//! JSON is accepted and missing fields get their default value.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Whisk client.
///
/// ```json
/// {
///   "transport": { "host": "chat.example.com", "port": 8080 },
///   "tokenService": { "baseUrl": "https://chat.example.com" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// WebSocket transport endpoint and reconnection policy.
    pub transport: TransportSettings,
    /// Token-issuance service endpoint.
    pub token_service: TokenServiceSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ClientSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.transport.reconnection.validate()?;
        if self.token_service.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "tokenService.timeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// WebSocket endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// `ws` or `wss`.
    pub scheme: String,
    /// Host name of the websocket service.
    pub host: String,
    /// Port of the websocket service.
    pub port: u16,
    /// Request path, always starting with `/`.
    pub path: String,
    /// Adapter-level reconnection policy.
    pub reconnection: ReconnectionSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "localhost".to_string(),
            port: 80,
            path: "/".to_string(),
            reconnection: ReconnectionSettings::default(),
        }
    }
}

impl TransportSettings {
    /// Full websocket URL, e.g. `ws://localhost:80/`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    fn validate(&self) -> Result<()> {
        if self.scheme != "ws" && self.scheme != "wss" {
            return Err(SettingsError::InvalidValue(format!(
                "transport.scheme must be ws or wss, got {}",
                self.scheme
            )));
        }
        if self.port == 0 {
            return Err(SettingsError::InvalidValue("transport.port must be 1-65535".into()));
        }
        if !self.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "transport.path must start with '/', got {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Reconnection policy applied by the transport adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectionSettings {
    /// Whether the adapter reconnects after an unexpected drop.
    pub enabled: bool,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap on the exponential delay.
    pub max_delay_ms: u64,
    /// Jitter range (0.0–1.0) applied around the delay.
    pub jitter_factor: f64,
    /// Give up after this many consecutive failures (`None` = never).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter_factor: 0.5,
            max_attempts: None,
        }
    }
}

impl ReconnectionSettings {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "transport.reconnection.jitterFactor must be within 0.0-1.0, got {}",
                self.jitter_factor
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "transport.reconnection.baseDelayMs exceeds maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

/// Token-issuance service settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenServiceSettings {
    /// Scheme, host and port of the HTTP API.
    pub base_url: String,
    /// Path of the renewal endpoint.
    pub renew_path: String,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for TokenServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            renew_path: "/rapt-whisk-router/api/renew_ws_session".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl TokenServiceSettings {
    /// Full renewal URL.
    pub fn renew_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.renew_path)
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
