use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filter::parse_ignore_list;
use crate::github::RepoType;

/// Main configuration structure for orgmirror
///
/// Credentials are deliberately absent: they come from the command line or
/// the environment only.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory that holds one clone per repository
    pub destination: Option<String>,

    /// Organization whose repositories are mirrored
    pub organization: Option<String>,

    /// Repository type filter passed to the listing API
    #[serde(default)]
    pub repo_type: RepoType,

    /// Mirror forks as well
    #[serde(default)]
    pub include_forks: bool,

    /// Repositories to skip, as `org/repo`
    #[serde(default)]
    pub ignore_list: Vec<String>,

    /// Listing API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backup counter persistence
    #[serde(default)]
    pub state: StateConfig,
}

/// Listing API configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// API root, without trailing slash
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// Repositories per page
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Repositories synchronized concurrently (1 = sequential)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for each git command in seconds (0 = no timeout)
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Git executable
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact", "full", "json"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Backup counter configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateConfig {
    /// Persist backup counters to SQLite
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database location (defaults to the XDG data directory)
    #[serde(default)]
    pub path: Option<String>,
}

// Default value functions
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_per_page() -> u32 {
    25
}
fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    1
}
fn default_command_timeout() -> u64 {
    3600
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            per_page: default_per_page(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            command_timeout: default_command_timeout(),
            git_binary: default_git_binary(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_true(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: None,
            organization: None,
            repo_type: RepoType::default(),
            include_forks: false,
            ignore_list: Vec::new(),
            api: ApiConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            state: StateConfig::default(),
        }
    }
}

/// Everything one mirroring run needs, resolved and validated.
///
/// Built once from [`Config`] plus command-line overrides and handed to
/// each component's constructor; nothing reads global option state.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub organization: String,
    pub repo_type: RepoType,
    pub destination: PathBuf,
    pub include_forks: bool,
    pub ignore_list: HashSet<String>,
    pub api: ApiConfig,
    pub max_parallel: usize,
    pub command_timeout: Option<Duration>,
    pub git_binary: String,
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("orgmirror").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(destination) = &self.destination {
            self.destination = Some(
                shellexpand::full(destination)
                    .context("Failed to expand destination path")?
                    .into_owned(),
            );
        }

        if let Some(path) = &self.state.path {
            self.state.path = Some(
                shellexpand::full(path)
                    .context("Failed to expand state database path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Resolve the settings for a run, failing if a required input is missing
    pub fn mirror_settings(&self) -> Result<MirrorSettings> {
        let organization = self
            .organization
            .clone()
            .filter(|org| !org.trim().is_empty())
            .ok_or_else(|| anyhow!("No organization configured (use --org or set `organization`)"))?;

        let destination = self
            .destination
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .ok_or_else(|| anyhow!("No destination directory configured (use --dir or set `destination`)"))?;
        let destination = shellexpand::full(destination)
            .context("Failed to expand destination path")?
            .into_owned();

        if self.api.per_page == 0 || self.api.per_page > 100 {
            return Err(anyhow!("api.per_page must be between 1 and 100, got {}", self.api.per_page));
        }

        let ignore_list = self
            .ignore_list
            .iter()
            .flat_map(|entry| parse_ignore_list(entry))
            .collect();

        Ok(MirrorSettings {
            organization,
            repo_type: self.repo_type,
            destination: PathBuf::from(destination),
            include_forks: self.include_forks,
            ignore_list,
            api: ApiConfig {
                base_url: self.api.base_url.trim_end_matches('/').to_string(),
                per_page: self.api.per_page,
            },
            max_parallel: self.sync.max_parallel.max(1),
            command_timeout: match self.sync.command_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            git_binary: self.sync.git_binary.clone(),
        })
    }

    /// Location of the backup counter database
    pub fn state_db_path(&self) -> Result<PathBuf> {
        match &self.state.path {
            Some(path) => Ok(PathBuf::from(
                shellexpand::full(path)
                    .context("Failed to expand state database path")?
                    .as_ref(),
            )),
            None => {
                let data_dir = dirs::data_dir().context("Failed to get user data directory")?;
                Ok(data_dir.join("orgmirror").join("state.db"))
            }
        }
    }
}
