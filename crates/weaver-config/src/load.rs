//! Configuration loading and layering.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::WeaverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Invalid(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}

/// Highest-precedence overrides, typically sourced from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub vault_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_api_key: Option<String>,
    pub workflows_enabled: Option<bool>,
}

/// Load configuration by precedence:
/// defaults → `<vault>/.weaver/weaver.toml` → user config → env → overrides.
///
/// `vault_path` seeds where the vault config file is looked up; the final
/// vault path may still be overridden by any later layer.
pub fn load(
    vault_path: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> Result<WeaverConfig, ConfigError> {
    let defaults =
        toml::to_string(&WeaverConfig::default()).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    let mut value: toml::Value = toml::from_str(&defaults)
        .map_err(|e: toml::de::Error| ConfigError::Serialize(e.to_string()))?;

    let seed_vault = overrides
        .vault_path
        .clone()
        .or(vault_path)
        .or_else(|| std::env::var("WEAVER_VAULT_PATH").ok().map(PathBuf::from));

    if let Some(vault) = &seed_vault {
        merge_file(&mut value, &vault.join(".weaver").join("weaver.toml"))?;
    }
    if let Some(user_file) = user_config_path() {
        merge_file(&mut value, &user_file)?;
    }

    let merged =
        toml::to_string(&value).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    let mut config: WeaverConfig =
        toml::from_str(&merged).map_err(|e| ConfigError::Invalid(e.to_string()))?;

    apply_env(&mut config);

    if let Some(vault) = seed_vault {
        if config.vault.path.as_os_str().is_empty() {
            config.vault.path = vault;
        }
    }
    if let Some(path) = overrides.vault_path {
        config.vault.path = path;
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
    if let Some(key) = overrides.llm_api_key {
        config.llm.api_key = Some(key);
    }
    if let Some(enabled) = overrides.workflows_enabled {
        config.workflows.enabled = enabled;
    }

    config.validate()?;
    Ok(config)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("weaver").join("weaver.toml"))
}

/// Merge one TOML file into the accumulated value, if it exists.
fn merge_file(base: &mut toml::Value, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let layer: toml::Value = toml::from_str(&raw).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "merging config layer");
    merge_value(base, layer);
    Ok(())
}

/// Recursive table merge; scalar and array leaves from `layer` win.
fn merge_value(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base_table), toml::Value::Table(layer_table)) => {
            for (key, layer_entry) in layer_table {
                match base_table.get_mut(&key) {
                    Some(base_entry) => merge_value(base_entry, layer_entry),
                    None => {
                        base_table.insert(key, layer_entry);
                    }
                }
            }
        }
        (base_slot, layer_value) => *base_slot = layer_value,
    }
}

/// Environment layer. Only well-known keys are recognized.
fn apply_env(config: &mut WeaverConfig) {
    if let Ok(path) = std::env::var("WEAVER_VAULT_PATH") {
        config.vault.path = PathBuf::from(path);
    }
    if let Ok(level) = std::env::var("WEAVER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(key) = std::env::var("WEAVER_LLM_API_KEY") {
        config.llm.api_key = Some(key);
    }
    if let Ok(url) = std::env::var("WEAVER_LLM_API_URL") {
        config.llm.api_url = Some(url);
    }
    if let Ok(model) = std::env::var("WEAVER_LLM_MODEL") {
        config.llm.default_model = model;
    }
}
