//! # simcase-config
//!
//! Configuration management for simcase.
//!
//! Loads configuration from:
//! 1. `~/.simcase/config.toml` (global)
//! 2. `./simcase.toml` (case-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub io: IoConfig,
    pub comm: CommConfig,
    pub registry: RegistryConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.simcase/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load case-local config (./simcase.toml) - overrides global
        let local_path = Path::new("simcase.toml");
        if local_path.exists() {
            debug!("Loading case config from {:?}", local_path);
            let contents = std::fs::read_to_string(local_path)?;
            config = toml::from_str(&contents)?;
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.simcase/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".simcase/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(kind) = std::env::var("SIMCASE_FILE_HANDLER") {
            self.io.file_handler = kind;
        }
        if let Ok(v) = std::env::var("SIMCASE_MASTER_ONLY") {
            self.io.master_only = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SIMCASE_COMM_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.comm.linear_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("SIMCASE_STRICT_CHECKIN") {
            self.registry.strict_checkin = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// File handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Installed file-handling strategy ("uncollated")
    pub file_handler: String,
    /// Only the master rank touches the filesystem on reads
    pub master_only: bool,
    /// Whether watched objects may be re-read mid-run
    pub runtime_modifiable: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            file_handler: "uncollated".to_string(),
            master_only: false,
            runtime_modifiable: true,
        }
    }
}

/// Communication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Rank count below which the linear schedule is used
    pub linear_threshold: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self { linear_threshold: 16 }
    }
}

/// Registry behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Escalate duplicate check-in from a warning to a panic,
    /// for diagnosing accidental double-registration.
    pub strict_checkin: bool,
    /// Region name whose duplicate check-in is silently tolerated.
    pub default_region: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_checkin: false,
            default_region: "region0".to_string(),
        }
    }
}
