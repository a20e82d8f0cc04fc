//! Configuration loading, validation, and management for promptweave.
//!
//! Loads configuration from `~/.promptweave/config.toml` with environment
//! variable overrides. Every field has a serde default, so a missing file or
//! a partial file both yield a usable configuration.

use promptweave_core::{Role, DEFAULT_DEPTH, DEFAULT_GROUP_WEIGHT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.promptweave/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Collection-wide defaults for fragment activation
    #[serde(default)]
    pub world_info: WorldInfoConfig,

    /// Author's note placement, used to resolve note-relative fragments
    #[serde(default)]
    pub author_note: AuthorNoteConfig,

    /// Injection planner defaults
    #[serde(default)]
    pub injection: InjectionConfig,

    /// Variable store defaults
    #[serde(default)]
    pub variables: VariablesConfig,
}

/// Defaults applied when a fragment leaves a matching option unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldInfoConfig {
    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default)]
    pub match_whole_words: bool,

    #[serde(default)]
    pub use_group_scoring: bool,

    #[serde(default = "default_depth")]
    pub default_depth: i64,

    #[serde(default = "default_group_weight")]
    pub default_group_weight: u32,
}

fn default_depth() -> i64 {
    DEFAULT_DEPTH
}
fn default_group_weight() -> u32 {
    DEFAULT_GROUP_WEIGHT
}

impl Default for WorldInfoConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            match_whole_words: false,
            use_group_scoring: false,
            default_depth: default_depth(),
            default_group_weight: default_group_weight(),
        }
    }
}

/// Where the author's note is placed by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotePlacement {
    /// The note is not placed at all.
    None,
    /// After the main prompt / story text.
    #[default]
    InPrompt,
    /// Inside the chat history at an explicit depth.
    InChat,
    /// Before the main prompt.
    BeforePrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorNoteConfig {
    #[serde(default)]
    pub placement: NotePlacement,

    /// Depth of the note when placed in-chat
    #[serde(default = "default_depth")]
    pub depth: i64,
}

impl Default for AuthorNoteConfig {
    fn default() -> Self {
        Self {
            placement: NotePlacement::default(),
            depth: default_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Role of injected content when an annotation does not name one
    #[serde(default = "default_role")]
    pub default_role: Role,
}

fn default_role() -> Role {
    Role::System
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariablesConfig {
    /// Start the store in "preview, do not commit" mode
    #[serde(default)]
    pub preview_mode: bool,
}

impl AssemblyConfig {
    /// Load configuration from the default path (~/.promptweave/config.toml).
    ///
    /// `PROMPTWEAVE_NOTE_DEPTH` overrides the author's note depth.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(depth) = std::env::var("PROMPTWEAVE_NOTE_DEPTH") {
            config.author_note.depth = depth.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "PROMPTWEAVE_NOTE_DEPTH must be an integer, got '{depth}'"
                ))
            })?;
            config.validate()?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".promptweave")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.world_info.default_depth < 0 {
            return Err(ConfigError::ValidationError(
                "world_info.default_depth must be >= 0".into(),
            ));
        }

        if self.world_info.default_group_weight == 0 {
            return Err(ConfigError::ValidationError(
                "world_info.default_group_weight must be > 0".into(),
            ));
        }

        if self.author_note.depth < 0 {
            return Err(ConfigError::ValidationError(
                "author_note.depth must be >= 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
