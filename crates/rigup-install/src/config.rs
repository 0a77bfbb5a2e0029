//! Runtime configuration.
//!
//! Built once at process start and passed down. Sources, lowest precedence
//! first: built-in defaults, a TOML file, `RIGUP_*` environment variables,
//! then command-line flags (applied by the binaries).

use std::path::{Path, PathBuf};

use rigup_core::{RetentionPolicy, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RIGUP_CONFIG";

/// System-wide config file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/rigup/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptConfig {
    #[serde(default = "default_true")]
    pub assume_yes: bool,

    /// Log mutating commands instead of running them
    #[serde(default)]
    pub dry_run: bool,

    /// Per-command timeout; 0 disables it
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    1800
}

impl Default for AptConfig {
    fn default() -> Self {
        Self {
            assume_yes: true,
            dry_run: false,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Backup retention as written by the user; negatives are caught by `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,

    #[serde(default = "default_keep_minimum")]
    pub keep_minimum: i64,
}

fn default_max_age_days() -> i64 {
    30
}

fn default_keep_minimum() -> i64 {
    2
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            keep_minimum: default_keep_minimum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigupConfig {
    /// Home directory of the user whose desktop is configured
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// History, sessions and backups live below this directory
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_required_disk_gb")]
    pub required_disk_gb: u64,

    #[serde(default = "default_min_memory_mb")]
    pub min_memory_mb: u64,

    /// Host probed by the network preflight check
    #[serde(default = "default_mirror_host")]
    pub mirror_host: String,

    /// Image copied into the wallpaper cache
    #[serde(default = "default_wallpaper_source")]
    pub wallpaper_source: PathBuf,

    #[serde(default)]
    pub apt: AptConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// Daemon bind address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Capacity of progress channels
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("rigup"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/rigup"))
}

fn default_required_disk_gb() -> u64 {
    10
}

fn default_min_memory_mb() -> u64 {
    2048
}

fn default_mirror_host() -> String {
    "deb.debian.org".to_string()
}

fn default_wallpaper_source() -> PathBuf {
    PathBuf::from("/usr/share/images/desktop-base/default")
}

fn default_listen() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_progress_buffer() -> usize {
    64
}

impl Default for RigupConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            state_dir: default_state_dir(),
            required_disk_gb: default_required_disk_gb(),
            min_memory_mb: default_min_memory_mb(),
            mirror_host: default_mirror_host(),
            wallpaper_source: default_wallpaper_source(),
            apt: AptConfig::default(),
            retention: RetentionConfig::default(),
            listen: default_listen(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl RigupConfig {
    /// Load from `explicit`, else the first existing candidate file, then
    /// apply the environment and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => candidate_paths().into_iter().find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "loading configuration");
                Self::from_file(&path)?
            }
            None => {
                debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `RIGUP_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RIGUP_HOME_DIR") {
            self.home_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RIGUP_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("RIGUP_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("RIGUP_DRY_RUN") {
            self.apt.dry_run = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "RIGUP_DRY_RUN must be a boolean, got {:?}",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_disk_gb == 0 {
            return Err(ConfigError::Invalid(
                "required_disk_gb must be greater than zero".to_string(),
            ));
        }
        if self.progress_buffer == 0 {
            return Err(ConfigError::Invalid(
                "progress_buffer must be greater than zero".to_string(),
            ));
        }
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".to_string()));
        }
        self.retention_policy()?;
        Ok(())
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy, ValidationError> {
        RetentionPolicy::new(self.retention.max_age_days, self.retention.keep_minimum)
    }

    pub fn required_disk_bytes(&self) -> u64 {
        self.required_disk_gb.saturating_mul(1 << 30)
    }

    pub fn min_memory_bytes(&self) -> u64 {
        self.min_memory_mb.saturating_mul(1 << 20)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn wallpaper_cache(&self) -> PathBuf {
        self.home_dir.join(".cache/rigup/wallpaper")
    }
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rigup/config.toml"));
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
    paths
}
