//! Config template round-trip.
//!
//! The HTTP boundary exposes the configuration as a YAML "template". A
//! template save persists only the values that differ from the built-in
//! defaults, so the user file never pins a default and future default
//! changes flow through automatically.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{self, DEFAULTS_TOML};
use crate::types::Config;
use crate::validate;

/// Parse a YAML template body into a validated [`Config`].
///
/// # Errors
///
/// Returns an error on malformed YAML, unknown keys, or validation
/// failure.
pub fn parse(yaml_body: &str) -> ConfigResult<Config> {
    let config: Config =
        serde_yaml::from_str(yaml_body).map_err(|e| ConfigError::Deserialize(e.to_string()))?;
    validate::check(&config)?;
    Ok(config)
}

/// Persist `config` to the user file, keeping only non-default values.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save(config: &Config, home_override: Option<&Path>) -> ConfigResult<()> {
    let defaults: toml::Value = toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::Parse {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })?;
    let full = toml::Value::try_from(config)
        .map_err(|e| ConfigError::Deserialize(e.to_string()))?;

    let diff = diff_non_defaults(&full, &defaults)
        .unwrap_or_else(|| toml::Value::Table(toml::map::Map::new()));

    let path = loader::user_config_path(home_override);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Read {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let body = toml::to_string_pretty(&diff)
        .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
    std::fs::write(&path, body).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

/// Render the persisted non-default overlay as a YAML template body.
///
/// # Errors
///
/// Returns an error if the user file is unreadable or malformed.
pub fn render(home_override: Option<&Path>) -> ConfigResult<String> {
    let path = loader::user_config_path(home_override);
    let overlay: toml::Value = if path.is_file() {
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    let json = toml_to_json(&overlay);
    serde_yaml::to_string(&json).map_err(|e| ConfigError::Deserialize(e.to_string()))
}

/// Keep only the parts of `value` that differ from `defaults`.
/// Returns `None` when nothing differs.
fn diff_non_defaults(value: &toml::Value, defaults: &toml::Value) -> Option<toml::Value> {
    match (value, defaults) {
        (toml::Value::Table(value_table), toml::Value::Table(default_table)) => {
            let mut out = toml::map::Map::new();
            for (key, entry) in value_table {
                match default_table.get(key) {
                    Some(default_entry) => {
                        if let Some(changed) = diff_non_defaults(entry, default_entry) {
                            out.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        out.insert(key.clone(), entry.clone());
                    }
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(toml::Value::Table(out))
            }
        }
        _ => {
            if value == defaults {
                None
            } else {
                Some(value.clone())
            }
        }
    }
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::from(*i),
        toml::Value::Float(f) => serde_json::Value::from(*f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Datetime(d) => serde_json::Value::String(d.to_string()),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_persists_only_non_defaults() {
        let home = TempDir::new().unwrap();
        let mut config = Config::default();
        config.daemon.port = 7777;

        save(&config, Some(home.path())).unwrap();

        let raw = std::fs::read_to_string(home.path().join("config.toml")).unwrap();
        let saved: toml::Value = toml::from_str(&raw).unwrap();
        assert_eq!(saved["daemon"]["port"].as_integer(), Some(7777));
        // No other section made it to disk.
        assert_eq!(saved.as_table().unwrap().len(), 1);
        assert_eq!(saved["daemon"].as_table().unwrap().len(), 1);
    }

    #[test]
    fn test_template_round_trip() {
        let home = TempDir::new().unwrap();
        let config = parse("daemon:\n  port: 7777\n").unwrap();
        assert_eq!(config.daemon.port, 7777);

        save(&config, Some(home.path())).unwrap();
        let rendered = render(Some(home.path())).unwrap();
        let back: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(back["daemon"]["port"].as_u64(), Some(7777));
        assert!(back["mcp"].is_null());
    }

    #[test]
    fn test_save_all_defaults_writes_empty_overlay() {
        let home = TempDir::new().unwrap();
        save(&Config::default(), Some(home.path())).unwrap();
        let raw = std::fs::read_to_string(home.path().join("config.toml")).unwrap();
        let saved: toml::Value = toml::from_str(&raw).unwrap();
        assert!(saved.as_table().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(parse("daemon:\n  port: -1\n").is_err());
        assert!(parse("daemon:\n  bogus: 1\n").is_err());
    }
}
