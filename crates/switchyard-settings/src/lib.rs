//! # switchyard-settings
//!
//! Configuration for the switchyard gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewayConfig::default()`]
//! 2. **Settings file**: `switchyard.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SWITCHYARD_*` overrides (highest priority)
//!
//! The loaded value lives in a [`ConfigHandle`]; [`watch_config_file`]
//! republishes it whenever the file changes.

#![deny(unsafe_code)]

pub mod errors;
pub mod handle;
pub mod loader;
pub mod types;
pub mod watcher;

pub use errors::{Result, SettingsError};
pub use handle::ConfigHandle;
pub use loader::{config_path, deep_merge, load_config_from_path, validate};
pub use types::*;
pub use watcher::{ConfigWatcher, watch_config_file};
