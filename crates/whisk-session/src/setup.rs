//! Startup from the client settings file.
//!
//! ```text
//! let setup = Setup::load(identity)?;   // ~/.whisk/client.json + WHISK_* env
//! setup.init_logging();
//! let mut session = Session::new(setup.deps.clone());
//! session.init(setup.config(), on_ready)?;
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use whisk_auth::IdentitySource;
use whisk_core::logging::{init_json_subscriber, init_subscriber};
use whisk_settings::{ClientSettings, load_settings, load_settings_from_path};

use crate::config::SessionConfig;
use crate::errors::Result;
use crate::session::SessionDeps;

/// Settings plus the collaborators built from them.
#[derive(Clone, Debug)]
pub struct Setup {
    /// The loaded settings.
    pub settings: ClientSettings,
    /// WebSocket transport and HTTP token service for those settings.
    pub deps: SessionDeps,
}

impl Setup {
    /// Load the default settings file.
    pub fn load(identity: Arc<dyn IdentitySource>) -> Result<Self> {
        Self::from_settings(load_settings()?, identity)
    }

    /// Load the settings file at `path`. A missing file yields defaults.
    pub fn from_path(path: &Path, identity: Arc<dyn IdentitySource>) -> Result<Self> {
        Self::from_settings(load_settings_from_path(path)?, identity)
    }

    /// Build the collaborators for already-loaded settings.
    pub fn from_settings(
        settings: ClientSettings,
        identity: Arc<dyn IdentitySource>,
    ) -> Result<Self> {
        let deps = SessionDeps::from_settings(&settings, identity)?;
        Ok(Self { settings, deps })
    }

    /// Install the global log subscriber the settings ask for. No-op if one
    /// is already installed.
    pub fn init_logging(&self) {
        let logging = &self.settings.logging;
        if logging.json {
            init_json_subscriber(&logging.level);
        } else {
            init_subscriber(&logging.level);
        }
        info!(level = %logging.level, json = logging.json, "logging initialized");
    }

    /// Session configuration pointing at the configured endpoint, with no
    /// route overrides.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::from_settings(&self.settings)
    }
}
