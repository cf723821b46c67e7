//! Platform-appropriate locations for the config document, run state and logs.
//!
//! Set `SNAPINATOR_CONFIG_DIR` to relocate everything (tests, portable installs).

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

const APP_DIR: &str = "snapinator";

pub const CONFIG_DIR_ENV: &str = "SNAPINATOR_CONFIG_DIR";

pub fn config_dir() -> PathBuf {
    config_dir_from(std::env::var_os(CONFIG_DIR_ENV))
}

/// An empty override is treated as unset.
fn config_dir_from(override_dir: Option<OsString>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".snapinator"))
}

/// Inbox of manual capture requests handed to a running daemon.
pub fn capture_requests_dir(config_path: &Path) -> PathBuf {
    config_path.with_file_name("requests")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Run-state snapshot kept beside the config document.
pub fn run_state_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name("runs.json")
}

pub fn default_log_path() -> PathBuf {
    config_dir().join("snapinator.log")
}

/// `~/Documents/Screenshots`, the directory the desktop app always used.
pub fn default_output_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Screenshots")
}

pub fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
