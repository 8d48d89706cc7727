//! Engine configuration loader for Maestro.
//!
//! Reads `config.toml` from the data directory (`~/.maestro/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use maestro_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparseable file: logs a warning and returns the default.
/// - Defaults that fail validation are replaced by the built-in defaults.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    let mut config = match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return EngineConfig::default();
        }
    };

    if let Err(err) = config.defaults.validate() {
        tracing::warn!(
            "Invalid [defaults] in {}: {err}, using default execution options",
            config_path.display()
        );
        config.defaults = Default::default();
    }

    tracing::debug!(
        roles = config.roles.len(),
        cache_max_entries = config.cache.max_entries,
        "loaded engine config"
    );
    config
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `MAESTRO_DATA_DIR` environment variable
/// 2. `$HOME/.maestro`
/// 3. `./.maestro`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MAESTRO_DATA_DIR") {
        return PathBuf::from(dir);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".maestro"),
        Err(_) => PathBuf::from(".maestro"),
    }
}
