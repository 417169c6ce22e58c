//! # whisk-settings
//!
//! Client settings with layered sources, in priority order:
//! 1. **Compiled defaults**: [`ClientSettings::default()`]
//! 2. **User file**: `~/.whisk/client.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WHISK_*` overrides (highest priority)
//!
//! Route handlers are code, not data, so they are not part of the settings;
//! they are supplied to the session at `init` time.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
