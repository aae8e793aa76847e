pub mod types;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

pub use types::Config;

const CONFIG_FILE_NAME: &str = ".evtx.toml";

/// Get the global config file path (~/.evtx.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Get the local config file path (./.evtx.toml)
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Load configuration from an explicit file, or the local then global
/// config, or defaults.
///
/// An explicit path must exist and parse. Implicit files that fail to parse
/// are skipped with a warning.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        return read_config(path);
    }

    let candidates = std::env::current_dir()
        .ok()
        .map(|dir| local_config_path(&dir))
        .into_iter()
        .chain(global_config_path());

    for path in candidates {
        if !path.exists() {
            continue;
        }
        match read_config(&path) {
            Ok(config) => {
                log::debug!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
            Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
        }
    }

    Ok(Config::default())
}

/// Parse one configuration file
pub fn read_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content).map_err(|e| ConfigError::ParsingFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(config)
}

/// Render a configuration as TOML
pub fn to_toml(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| {
        ConfigError::InvalidValue {
            key: "config".to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
