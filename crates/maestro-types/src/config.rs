//! Engine configuration types for Maestro.
//!
//! `EngineConfig` is the top-level `config.toml`: the role-alias table,
//! result-cache settings and the default `ExecutionOptions` applied to every
//! run. All fields have sensible defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::task::AgentRole;

/// Rejected execution options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("max_retries must be at least 1")]
    ZeroRetries,

    #[error("auto_save_interval_ms must be at least 1")]
    ZeroAutoSaveInterval,
}

// ---------------------------------------------------------------------------
// ExecutionOptions
// ---------------------------------------------------------------------------

/// Per-run execution options. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Upper bound on concurrently running steps in a parallel group.
    /// `None` means unbounded. Spawned tasks run inside their parent step's
    /// slot and are not counted.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// When false, a failure stops the rest of the current sequential group.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    /// When true, a failure stops all further scheduling.
    #[serde(default)]
    pub abort_on_error: bool,

    /// Resume from this checkpoint instead of starting fresh.
    #[serde(default)]
    pub checkpoint_id: Option<Uuid>,

    #[serde(default = "default_true")]
    pub enable_checkpoints: bool,

    #[serde(default = "default_auto_save_interval_ms")]
    pub auto_save_interval_ms: u64,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Per-run cache TTL; falls back to the cache default when unset.
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub enable_retry: bool,

    /// Total attempts, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Backoff cap.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_auto_save_interval_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            continue_on_error: true,
            abort_on_error: false,
            checkpoint_id: None,
            enable_checkpoints: true,
            auto_save_interval_ms: default_auto_save_interval_ms(),
            enable_cache: true,
            cache_ttl_ms: None,
            enable_retry: true,
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl ExecutionOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.auto_save_interval_ms == 0 {
            return Err(ConfigError::ZeroAutoSaveInterval);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for the engine.
///
/// Loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Role alias -> role.
    #[serde(default)]
    pub roles: HashMap<String, AgentRole>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Options used by runs started without their own, such as
    /// `WorkflowEngine::execute_with_defaults`.
    #[serde(default)]
    pub defaults: ExecutionOptions,
}

impl EngineConfig {
    /// Resolve a role alias, falling back to a bare role named after it.
    pub fn resolve_role(&self, alias: &str) -> AgentRole {
        self.roles
            .get(alias)
            .cloned()
            .unwrap_or_else(|| AgentRole::named(alias))
    }
}

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_cache_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_cache_ttl_ms(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_options_defaults() {
        let opts = ExecutionOptions::default();
        assert_eq!(opts.max_concurrency, None);
        assert!(opts.continue_on_error);
        assert!(!opts.abort_on_error);
        assert!(opts.enable_checkpoints);
        assert_eq!(opts.auto_save_interval_ms, 60_000);
        assert!(opts.enable_cache);
        assert!(opts.enable_retry);
        assert_eq!(opts.max_retries, 3);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let opts = ExecutionOptions {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::ZeroConcurrency));

        let opts = ExecutionOptions {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::ZeroRetries));

        let opts = ExecutionOptions {
            auto_save_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate(), Err(ConfigError::ZeroAutoSaveInterval));
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert!(config.roles.is_empty());
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.default_ttl_ms, 604_800_000);
        assert_eq!(config.defaults, ExecutionOptions::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
[roles.dev]
name = "developer"
model = "claude-sonnet"

[cache]
max_entries = 10

[defaults]
max_concurrency = 4
abort_on_error = true
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resolve_role("dev").name, "developer");
        assert_eq!(config.resolve_role("dev").model.as_deref(), Some("claude-sonnet"));
        assert_eq!(config.resolve_role("qa"), AgentRole::named("qa"));
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.default_ttl_ms, 604_800_000);
        assert_eq!(config.defaults.max_concurrency, Some(4));
        assert!(config.defaults.abort_on_error);
        assert!(config.defaults.continue_on_error);
    }
}
