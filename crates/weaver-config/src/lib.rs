//! Layered configuration for the Weaver engine.
//!
//! One structured configuration loaded by precedence:
//! defaults → vault config file (`<vault>/.weaver/weaver.toml`) → user config
//! (`~/.config/weaver/weaver.toml`) → environment → programmatic overrides.
//!
//! Later layers override earlier ones table-by-table. Sensitive values are
//! masked whenever the configuration is serialized for display.

mod load;

pub use load::{ConfigError, ConfigOverrides};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeaverConfig {
    pub vault: VaultConfig,
    pub shadow_cache: ShadowCacheConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub rules: RulesConfig,
    pub sync: SyncConfig,
    pub workflows: WorkflowsConfig,
    pub logging: LoggingConfig,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            vault: VaultConfig::default(),
            shadow_cache: ShadowCacheConfig::default(),
            memory: MemoryConfig::default(),
            llm: LlmConfig::default(),
            rules: RulesConfig::default(),
            sync: SyncConfig::default(),
            workflows: WorkflowsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Absolute vault root.
    pub path: PathBuf,
    pub watcher: WatcherConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            watcher: WatcherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    /// Coalescing window for raw filesystem events.
    pub debounce_ms: u64,
    /// Vault-relative prefixes that never produce events.
    pub ignore: Vec<String>,
    /// Queue high-water mark before redundant intermediates are dropped.
    pub queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            ignore: vec![
                ".git/".into(),
                ".obsidian/".into(),
                ".weaver/".into(),
                "node_modules/".into(),
            ],
            queue_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowCacheConfig {
    /// Persistent index location; empty means `<vault>/.weaver/cache.db`.
    pub path: PathBuf,
    /// `full_sync` runs at startup when the vault's max mtime exceeds the
    /// recorded `last_sync_at` by more than this many seconds.
    pub staleness_threshold_secs: u64,
}

impl Default for ShadowCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            staleness_threshold_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Persistent memory store location; empty means `<vault>/.weaver/memory.db`.
    pub path: PathBuf,
    /// Background TTL sweep interval.
    pub sweep_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider selector; any OpenAI-compatible chat endpoint works.
    pub provider: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub default_model: String,
    /// Token bucket capacity per minute.
    pub rate_limit_per_minute: u32,
    pub max_retries: u32,
    /// Consecutive failures before the circuit opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            api_key: None,
            api_url: None,
            default_model: "gpt-4o-mini".into(),
            rate_limit_per_minute: 50,
            max_retries: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesConfig {
    /// Worker slots for rule actions across distinct paths.
    pub parallelism: usize,
    pub action_timeout_ms: u64,
    /// Wait after cancellation before a rule is abandoned.
    pub grace_period_ms: u64,
    /// Failures within the window before a rule is quarantined.
    pub quarantine_threshold: u32,
    pub quarantine_window_secs: u64,
    /// Ring buffer size of the execution log.
    pub execution_log_size: usize,
    pub auto_tag: AutoTagConfig,
    pub auto_link: AutoLinkConfig,
    pub daily_note: DailyNoteConfig,
    pub meeting_note: MeetingNoteConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            action_timeout_ms: 30_000,
            grace_period_ms: 2_000,
            quarantine_threshold: 5,
            quarantine_window_secs: 300,
            execution_log_size: 1_000,
            auto_tag: AutoTagConfig::default(),
            auto_link: AutoLinkConfig::default(),
            daily_note: DailyNoteConfig::default(),
            meeting_note: MeetingNoteConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoTagConfig {
    pub enabled: bool,
    /// Also fire on FILE_CHANGE, not just FILE_ADD.
    pub on_change: bool,
    pub min_content_length: usize,
    pub confidence_threshold: f64,
    pub max_tags: usize,
}

impl Default for AutoTagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_change: false,
            min_content_length: 50,
            confidence_threshold: 0.7,
            max_tags: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoLinkConfig {
    pub enabled: bool,
    pub min_content_length: usize,
    /// Levenshtein ratio a candidate must reach against a note title.
    pub match_threshold: f64,
    pub max_links: usize,
    /// Candidate phrases considered per note.
    pub max_candidates: usize,
}

impl Default for AutoLinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_content_length: 200,
            match_threshold: 0.8,
            max_links: 10,
            max_candidates: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DailyNoteConfig {
    pub enabled: bool,
}

impl Default for DailyNoteConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeetingNoteConfig {
    pub enabled: bool,
}

impl Default for MeetingNoteConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Notes per reconciliation batch.
    pub batch_size: usize,
    /// Concurrent batches during full reconciliation.
    pub parallelism: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            parallelism: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowsConfig {
    pub enabled: bool,
    /// Directory scanned recursively for `*.workflow` definitions; empty
    /// means `<vault>/.weaver/workflows`.
    pub root: PathBuf,
    /// Run-state database; empty means `<vault>/.weaver/workflows.db`.
    pub db_path: PathBuf,
    pub max_concurrency: usize,
    /// Per-workflow wall clock budget.
    pub timeout_ms: u64,
    /// Default per-step timeout when a step declares none.
    pub step_timeout_ms: u64,
    /// Bind address of the inspection HTTP surface; empty disables it.
    pub http_addr: String,
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::new(),
            db_path: PathBuf::new(),
            max_concurrency: 4,
            timeout_ms: 900_000,
            step_timeout_ms: 300_000,
            http_addr: "127.0.0.1:7171".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// tracing EnvFilter directive, e.g. `info` or `weaver_rules=debug`.
    pub level: String,
    /// Rotated event-log directory; empty means `<vault>/.weaver/logs`.
    pub dir: PathBuf,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: PathBuf::new(),
            retention_days: 7,
        }
    }
}

impl WeaverConfig {
    /// Load configuration with full precedence. See [`load::load`].
    pub fn load(
        vault_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        load::load(vault_path, overrides)
    }

    /// Directory for engine-owned state inside the vault.
    pub fn state_dir(&self) -> PathBuf {
        self.vault.path.join(".weaver")
    }

    pub fn cache_db_path(&self) -> PathBuf {
        resolve_or(&self.shadow_cache.path, self.state_dir().join("cache.db"))
    }

    pub fn memory_db_path(&self) -> PathBuf {
        resolve_or(&self.memory.path, self.state_dir().join("memory.db"))
    }

    pub fn workflow_db_path(&self) -> PathBuf {
        resolve_or(&self.workflows.db_path, self.state_dir().join("workflows.db"))
    }

    pub fn workflow_root(&self) -> PathBuf {
        resolve_or(&self.workflows.root, self.state_dir().join("workflows"))
    }

    pub fn log_dir(&self) -> PathBuf {
        resolve_or(&self.logging.dir, self.state_dir().join("logs"))
    }

    /// Validate invariants that would otherwise surface as runtime faults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vault.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("vault.path is required".into()));
        }
        if !self.vault.path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "vault.path must be absolute, got {}",
                self.vault.path.display()
            )));
        }
        if self.vault.watcher.debounce_ms == 0 {
            return Err(ConfigError::Invalid(
                "vault.watcher.debounce_ms must be > 0".into(),
            ));
        }
        if self.rules.parallelism == 0 {
            return Err(ConfigError::Invalid("rules.parallelism must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.rules.auto_tag.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "rules.auto_tag.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rules.auto_link.match_threshold) {
            return Err(ConfigError::Invalid(
                "rules.auto_link.match_threshold must be within [0, 1]".into(),
            ));
        }
        if self.llm.rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "llm.rate_limit_per_minute must be > 0".into(),
            ));
        }
        if self.sync.batch_size == 0 || self.sync.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "sync.batch_size and sync.parallelism must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Serialize for display with secrets masked.
    pub fn display_as_toml(&self) -> Result<String, ConfigError> {
        let mut masked = self.clone();
        if let Some(key) = &mut masked.llm.api_key {
            *key = mask_secret(key);
        }
        toml::to_string_pretty(&masked).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

fn resolve_or(configured: &Path, fallback: PathBuf) -> PathBuf {
    if configured.as_os_str().is_empty() {
        fallback
    } else {
        configured.to_path_buf()
    }
}

/// Keep the first four characters for recognizability, mask the rest.
fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".into()
    } else {
        format!("{}****", &secret[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_hold() {
        let config = WeaverConfig::default();
        assert_eq!(config.vault.watcher.debounce_ms, 1_000);
        assert_eq!(config.rules.parallelism, 5);
        assert_eq!(config.rules.action_timeout_ms, 30_000);
        assert_eq!(config.llm.rate_limit_per_minute, 50);
        assert_eq!(config.rules.auto_tag.confidence_threshold, 0.7);
        assert_eq!(config.rules.auto_link.match_threshold, 0.8);
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.memory.sweep_interval_secs, 60);
        assert!(config
            .vault
            .watcher
            .ignore
            .iter()
            .any(|p| p == ".obsidian/"));
    }

    #[test]
    fn validation_rejects_relative_vault() {
        let mut config = WeaverConfig::default();
        config.vault.path = PathBuf::from("relative/vault");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn derived_paths_fall_back_to_state_dir() {
        let mut config = WeaverConfig::default();
        config.vault.path = PathBuf::from("/vault");
        assert_eq!(config.cache_db_path(), PathBuf::from("/vault/.weaver/cache.db"));
        assert_eq!(config.memory_db_path(), PathBuf::from("/vault/.weaver/memory.db"));

        config.shadow_cache.path = PathBuf::from("/elsewhere/cache.db");
        assert_eq!(config.cache_db_path(), PathBuf::from("/elsewhere/cache.db"));
    }

    #[test]
    fn display_masks_api_key() {
        let mut config = WeaverConfig::default();
        config.llm.api_key = Some("sk-secret-value".into());
        let shown = config.display_as_toml().unwrap();
        assert!(!shown.contains("sk-secret-value"));
        assert!(shown.contains("sk-s****"));
    }
}
