//! Configuration loading, validation, and management for relayclaw.
//!
//! Loads configuration from `~/.relayclaw/config.toml` with environment
//! variable overrides. Validates all settings before a flow is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The root configuration structure.
///
/// Maps directly to `~/.relayclaw/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Per-invocation run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Static labels added to every model request
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// How model output is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// One buffered response per model call
    #[default]
    None,
    /// Incremental partial responses followed by one final response
    Sse,
}

impl StreamingMode {
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Sse)
    }
}

impl FromStr for StreamingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "buffered" => Ok(Self::None),
            "sse" | "streamed" => Ok(Self::Sse),
            other => Err(ConfigError::ValidationError(format!(
                "unknown streaming mode '{other}' (expected 'none' or 'sse')"
            ))),
        }
    }
}

/// Settings carried by every invocation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub streaming_mode: StreamingMode,

    /// Model calls allowed per invocation across all agents (0 = unlimited)
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: u32,

    /// Capacity of the output event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Run sibling tool calls from one model response concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_max_llm_calls() -> u32 {
    500
}
fn default_event_buffer() -> usize {
    64
}
fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            streaming_mode: StreamingMode::default(),
            max_llm_calls: default_max_llm_calls(),
            event_buffer: default_event_buffer(),
            parallel_tool_calls: true,
        }
    }
}

impl RunConfig {
    /// A streamed-mode config with otherwise default settings.
    pub fn streaming() -> Self {
        Self {
            streaming_mode: StreamingMode::Sse,
            ..Self::default()
        }
    }
}

impl FlowConfig {
    /// Load configuration from the default path (~/.relayclaw/config.toml).
    ///
    /// Environment variables override the file:
    /// - `RELAYCLAW_STREAMING_MODE` (`none` or `sse`)
    /// - `RELAYCLAW_MAX_LLM_CALLS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(mode) = std::env::var("RELAYCLAW_STREAMING_MODE") {
            config.run.streaming_mode = mode.parse()?;
        }

        if let Ok(limit) = std::env::var("RELAYCLAW_MAX_LLM_CALLS") {
            config.run.max_llm_calls = limit.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RELAYCLAW_MAX_LLM_CALLS must be a non-negative integer, got '{limit}'"
                ))
            })?;
        }

        config.validate()?;
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".relayclaw")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "run.event_buffer must be at least 1".into(),
            ));
        }

        if let Some(key) = self.labels.keys().find(|k| k.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "label keys must not be blank (got {key:?})"
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
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

impl From<ConfigError> for relayclaw_core::Error {
    fn from(err: ConfigError) -> Self {
        relayclaw_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = FlowConfig::default();
        assert_eq!(config.run.streaming_mode, StreamingMode::None);
        assert_eq!(config.run.max_llm_calls, 500);
        assert!(config.run.parallel_tool_calls);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = FlowConfig::default();
        config.labels.insert("team".into(), "support".into());
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: FlowConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn zero_event_buffer_rejected() {
        let mut config = FlowConfig::default();
        config.run.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_label_key_rejected() {
        let mut config = FlowConfig::default();
        config.labels.insert("  ".into(), "x".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = FlowConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, FlowConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[run]
streaming_mode = "sse"
max_llm_calls = 3

[labels]
env = "staging"
"#
        )
        .unwrap();

        let config = FlowConfig::load_from(file.path()).unwrap();
        assert!(config.run.streaming_mode.is_streaming());
        assert_eq!(config.run.max_llm_calls, 3);
        assert_eq!(config.run.event_buffer, 64);
        assert_eq!(config.labels["env"], "staging");
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nmax_llm_calls = \"many\"").unwrap();
        let err = FlowConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn streaming_mode_parses_aliases() {
        assert_eq!("SSE".parse::<StreamingMode>().unwrap(), StreamingMode::Sse);
        assert_eq!(
            "buffered".parse::<StreamingMode>().unwrap(),
            StreamingMode::None
        );
        assert!("bidi".parse::<StreamingMode>().is_err());
    }

    #[test]
    fn config_error_converts_to_core_error() {
        let err: relayclaw_core::Error = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(err, relayclaw_core::Error::Config { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = FlowConfig::default_toml();
        assert!(toml_str.contains("max_llm_calls = 500"));
        assert!(toml_str.contains(r#"streaming_mode = "none""#));
    }
}
