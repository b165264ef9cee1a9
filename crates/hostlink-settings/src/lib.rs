//! # hostlink-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HostlinkSettings::default()`]
//! 2. **Settings file**: `~/.hostlink/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `HOSTLINK_*` overrides
//!
//! There is no global instance; the binary loads settings once and passes
//! the pieces to the components that need them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
