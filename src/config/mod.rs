// dtsflow — Engine and tool configuration

use crate::expression::MAX_EXPRESSION_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capture name used for steps that declare no `Output`.
    #[serde(default = "default_output_name")]
    pub default_output_name: String,
    #[serde(default = "default_output_format")]
    pub default_output_format: String,
    /// Recursion bound for `@[Scope::Name]` expansion.
    #[serde(default = "default_expression_max_depth")]
    pub expression_max_depth: usize,
    /// Parameter keys whose relative values are resolved against the
    /// workflow document's directory.
    #[serde(default = "default_path_parameters")]
    pub path_parameters: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_output_name: default_output_name(),
            default_output_format: default_output_format(),
            expression_max_depth: default_expression_max_depth(),
            path_parameters: default_path_parameters(),
        }
    }
}

fn default_output_name() -> String {
    "Result".to_string()
}
fn default_output_format() -> String {
    "text".to_string()
}
fn default_expression_max_depth() -> usize {
    10
}
fn default_path_parameters() -> Vec<String> {
    ["file_path", "directory", "path", "output_file_path"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub restrict_to_workspace: bool,
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            restrict_to_workspace: false,
            plugins_dir: default_plugins_dir(),
        }
    }
}

fn default_workspace() -> String {
    ".".to_string()
}
fn default_plugins_dir() -> String {
    "~/.dtsflow/plugins".to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (prefix: DTSFLOW_)
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DTSFLOW_ENGINE_DEFAULT_OUTPUT_NAME") {
            self.engine.default_output_name = v;
        }
        if let Ok(v) = std::env::var("DTSFLOW_ENGINE_DEFAULT_OUTPUT_FORMAT") {
            self.engine.default_output_format = v;
        }
        if let Ok(v) = std::env::var("DTSFLOW_ENGINE_EXPRESSION_MAX_DEPTH") {
            if let Ok(n) = v.parse() {
                self.engine.expression_max_depth = n;
            }
        }
        if let Ok(v) = std::env::var("DTSFLOW_TOOLS_WORKSPACE") {
            self.tools.workspace = v;
        }
        if let Ok(v) = std::env::var("DTSFLOW_TOOLS_RESTRICT_TO_WORKSPACE") {
            self.tools.restrict_to_workspace = v.parse().unwrap_or(false);
        }
        if let Ok(v) = std::env::var("DTSFLOW_TOOLS_PLUGINS_DIR") {
            self.tools.plugins_dir = v;
        }
    }

    /// Get the default config file path: ~/.dtsflow/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".dtsflow").join("config.json"))
    }

    /// Resolve the plugins directory, expanding `~` to home directory.
    pub fn plugins_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.tools.plugins_dir)
    }

    /// Resolve the tool workspace, expanding `~` to home directory.
    pub fn workspace_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.tools.workspace)
    }

    /// Validate configuration for basic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.default_output_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "engine.default_output_name must not be empty".to_string(),
            ));
        }
        if self.engine.expression_max_depth == 0 {
            return Err(ConfigError::Invalid(
                "engine.expression_max_depth must be at least 1".to_string(),
            ));
        }
        if self.engine.expression_max_depth > MAX_EXPRESSION_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "engine.expression_max_depth must be at most {}",
                MAX_EXPRESSION_DEPTH
            )));
        }
        Ok(())
    }
}

fn expand_home(raw: &str) -> Result<PathBuf, ConfigError> {
    if let Some(stripped) = raw.strip_prefix('~') {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(raw.strip_prefix("~/").unwrap_or(stripped)))
    } else {
        Ok(PathBuf::from(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
