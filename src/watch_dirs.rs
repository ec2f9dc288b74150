//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! # Environment Overrides
//!
//! - `OVERRIDE_WATCH_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Directory name used under the platform config root.
const APP_DIR_NAME: &str = "override-watch";

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/override-watch/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("OVERRIDE_WATCH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/override-watch-config"))
}

/// Path to `config.toml`.
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
