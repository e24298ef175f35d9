pub mod gateway;

pub use gateway::*;

use std::path::PathBuf;

/// Returns the global config directory path: `~/.config/privacy-gateway/`
pub fn dirs_global() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("privacy-gateway")
}

/// Config file used when none is given: `~/.config/privacy-gateway/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs_global().join("config.yaml")
}
