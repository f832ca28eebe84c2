use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "LYRA_CONFIG_DIR";

const CONFIG_FILE: &str = "runtime.json";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Longest accepted fatal shutdown wait
const MAX_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Module namespace discovered at startup
    pub namespace: String,

    /// Bounded wait for a graceful fatal shutdown, in milliseconds
    pub shutdown_timeout_ms: u64,

    /// Default log filter when RUST_LOG is not set
    pub log_level: String,

    /// Log directory; defaults to `logs/` next to the config file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: "app".to_string(),
            shutdown_timeout_ms: 5_000,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the platform-specific config directory.
    /// Creates default config if file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_dir())
    }

    /// Load `runtime.json` from `dir`, writing defaults when it is missing
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);

        if !path.exists() {
            let config = RuntimeConfig::default();
            config.save_to(dir)?;
            tracing::info!("Created default config at: {}", path.display());
            return Ok(config);
        }

        let load_failed = |source: BoxError| ConfigError::LoadFailed {
            path: path.display().to_string(),
            source,
        };
        let content = fs::read_to_string(&path).map_err(|e| load_failed(Box::new(e)))?;
        let config: RuntimeConfig =
            serde_json::from_str(&content).map_err(|e| load_failed(Box::new(e)))?;
        config.validate()?;

        tracing::debug!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to `dir`
    pub fn save_to(&self, dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(dir).map_err(|source| ConfigError::DirectoryCreationFailed {
            path: dir.display().to_string(),
            source,
        })?;

        let path = dir.join(CONFIG_FILE);
        let save_failed = |source: BoxError| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| save_failed(Box::new(e)))?;
        fs::write(&path, json).map_err(|e| save_failed(Box::new(e)))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.shutdown_timeout_ms == 0 || self.shutdown_timeout_ms > MAX_SHUTDOWN_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "shutdown_timeout_ms must be 1-{} (got {})",
                MAX_SHUTDOWN_TIMEOUT_MS, self.shutdown_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Config directory: `$LYRA_CONFIG_DIR`, else `<platform config>/Lyra`
    pub fn config_dir() -> PathBuf {
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .map(|dir| dir.join("Lyra"))
            .unwrap_or_else(|| PathBuf::from("config"))
    }

    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("logs"))
    }
}
