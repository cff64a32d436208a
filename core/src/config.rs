//! Configuration loading
//!
//! Search order, first readable and parseable file wins:
//! 1. `MACSPOOF_CONFIG` env var
//! 2. `./macspoof.toml`
//! 3. `$XDG_CONFIG_HOME/macspoof/config.toml`
//! 4. `~/.macspoof/config.toml`
//! 5. built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SpoofError, SpoofResult};
use crate::spoofer::MacStrategy;

pub const CONFIG_ENV: &str = "MACSPOOF_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpooferConfig {
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Unwind applied steps when a step fails
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    /// Read back every write
    #[serde(default = "default_true")]
    pub verify_changes: bool,
    /// Seconds to wait for a busy interface; 0 waits forever
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// Refuse to run without root / administrator
    #[serde(default = "default_true")]
    pub privilege_check: bool,
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout() -> u64 {
    30
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            verify_changes: true,
            lock_timeout_secs: default_lock_timeout(),
            privilege_check: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Reject universally administered addresses with unknown vendor prefixes
    #[serde(default)]
    pub strict_vendor: bool,
    /// Generate vendor-prefixed addresses rather than locally administered ones
    #[serde(default = "default_true")]
    pub realistic_only: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            strict_vendor: false,
            realistic_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for history, profiles and schedules
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_profiles")]
    pub max_profiles: usize,
}

fn default_state_dir() -> String {
    "~/.macspoof".to_string()
}

fn default_history_limit() -> usize {
    1000
}

fn default_max_profiles() -> usize {
    50
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            history_limit: default_history_limit(),
            max_profiles: default_max_profiles(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Per-invocation timeout for OS tools
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    10
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout(),
        }
    }
}

impl SpooferConfig {
    /// Load from the search path, falling back to defaults
    pub fn load() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}={}", CONFIG_ENV, path.display());
                        return config;
                    }
                    Err(e) => tracing::warn!("{}", e),
                }
            } else {
                tracing::warn!("{}={} does not exist", CONFIG_ENV, env_path);
            }
        }

        for path in search_paths() {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }

        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    pub fn from_file(path: &Path) -> SpoofResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SpoofError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| SpoofError::Config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.storage.state_dir)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join("history.json")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.state_dir().join("profiles.json")
    }

    pub fn schedules_path(&self) -> PathBuf {
        self.state_dir().join("schedules.json")
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        match self.transaction.lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Strategy used when the caller asks for "a random address"
    pub fn default_strategy(&self) -> MacStrategy {
        if self.validation.realistic_only {
            MacStrategy::Realistic
        } else {
            MacStrategy::Random
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("macspoof.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("macspoof").join("config.toml"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".macspoof").join("config.toml"));
    }
    paths
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
