//! Config file discovery and layered loading.
//!
//! `Config::load()` order:
//! 1. Parse embedded `defaults.toml` → base
//! 2. Merge `~/.gobby/config.toml` (user)
//! 3. Apply `GOBBY_PORT` / `GOBBY_LOG_LEVEL`-style env overrides
//! 4. Deserialize merged tree → `Config`
//! 5. Validate

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
pub(crate) const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Load configuration with layered precedence.
///
/// `home_override` replaces `~/.gobby` for user-level discovery (tests,
/// alternate installs).
///
/// # Errors
///
/// Returns a [`ConfigError`] if any layer is malformed or the merged
/// configuration fails validation.
pub fn load(home_override: Option<&Path>) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::Parse {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let user_path = user_config_path(home_override);
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, &overlay);
        info!(path = %user_path.display(), "loaded user config");
    } else {
        debug!(path = %user_path.display(), "no user config; using defaults");
    }

    apply_env_overrides(&mut merged);

    let config: Config = merged
        .try_into()
        .map_err(|e| ConfigError::Deserialize(e.to_string()))?;

    validate::check(&config)?;
    Ok(config)
}

/// Where the user config file lives.
#[must_use]
pub fn user_config_path(home_override: Option<&Path>) -> PathBuf {
    home_override
        .map(Path::to_path_buf)
        .unwrap_or_else(gobby_core::dirs::gobby_home)
        .join("config.toml")
}

fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    let value = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Recursively merge `overlay` into `base`. Tables merge key-by-key;
/// everything else replaces.
pub(crate) fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_table.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, _) => *base_slot = overlay.clone(),
    }
}

/// Env overrides for the handful of knobs useful outside a config file.
fn apply_env_overrides(merged: &mut toml::Value) {
    if let Ok(port) = std::env::var("GOBBY_PORT") {
        if let Ok(port) = port.parse::<i64>() {
            set_path(merged, &["daemon", "port"], toml::Value::Integer(port));
        }
    }
    if let Ok(port) = std::env::var("GOBBY_WEBSOCKET_PORT") {
        if let Ok(port) = port.parse::<i64>() {
            set_path(merged, &["daemon", "websocket_port"], toml::Value::Integer(port));
        }
    }
}

fn set_path(value: &mut toml::Value, path: &[&str], leaf: toml::Value) {
    let Some((head, rest)) = path.split_first() else {
        *value = leaf;
        return;
    };
    if let toml::Value::Table(table) = value {
        let entry = table
            .entry((*head).to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        set_path(entry, rest, leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_when_no_file() {
        let home = TempDir::new().unwrap();
        let config = load(Some(home.path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_file_overlays_defaults() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[daemon]\nport = 9999\n[mcp]\ntool_timeout_secs = 5\n",
        )
        .unwrap();

        let config = load(Some(home.path())).unwrap();
        assert_eq!(config.daemon.port, 9999);
        assert_eq!(config.mcp.tool_timeout_secs, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.agents.max_agent_depth, 3);
    }

    #[test]
    fn test_malformed_file_errors() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("config.toml"), "not valid [[ toml").unwrap();
        assert!(load(Some(home.path())).is_err());
    }

    #[test]
    fn test_deep_merge_preserves_sibling_keys() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 9\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(9));
    }
}
