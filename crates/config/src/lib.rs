//! Configuration loading, validation, and management for Windlass.
//!
//! Loads configuration from `~/.windlass/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use windlass_core::tool::ToolSchemaRegistry;

/// The root configuration structure.
///
/// Maps directly to `~/.windlass/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Context budget and token counting
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Stream decoder settings
    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Length-truncation continuation
    #[serde(default)]
    pub continuation: ContinuationConfig,

    /// Pruning thresholds
    #[serde(default)]
    pub pruner: PrunerSettings,

    /// Deletion mark storage
    #[serde(default)]
    pub marks: MarksConfig,

    /// Extra tool schemas recognised by the decoder and pruner
    #[serde(default)]
    pub tools: Vec<ToolSchemaConfig>,
}

/// Which token counter estimates context size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// 4 characters per token plus per-message overhead
    #[default]
    Heuristic,
    /// 1.3 tokens per whitespace-separated word
    Words,
    /// BPE counting (requires the `tiktoken` feature of windlass-agent)
    Tiktoken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default)]
    pub counter: CounterKind,
}

fn default_max_context_tokens() -> usize {
    100_000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            counter: CounterKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Characters withheld at the end of the buffer while in plain text
    #[serde(default = "default_holdback_chars")]
    pub holdback_chars: usize,

    #[serde(default = "default_thinking_open")]
    pub thinking_open: String,

    #[serde(default = "default_thinking_close")]
    pub thinking_close: String,
}

fn default_holdback_chars() -> usize {
    100
}
fn default_thinking_open() -> String {
    "<thinking>".into()
}
fn default_thinking_close() -> String {
    "</thinking>".into()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            holdback_chars: default_holdback_chars(),
            thinking_open: default_thinking_open(),
            thinking_close: default_thinking_close(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationConfig {
    /// Continuation rounds allowed after the first round
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
}

fn default_max_continuations() -> usize {
    3
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_continuations: default_max_continuations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrunerSettings {
    /// Classified messages that compaction always leaves untouched
    #[serde(default = "default_min_retained")]
    pub min_retained_classified: usize,

    /// Tool-call field values longer than this (in characters) are cleared
    #[serde(default = "default_field_clear_threshold")]
    pub field_clear_threshold: usize,

    /// `preserve_pairs` for marks written without an explicit flag
    #[serde(default = "default_true")]
    pub preserve_pairs_default: bool,
}

fn default_min_retained() -> usize {
    6
}
fn default_field_clear_threshold() -> usize {
    500
}
fn default_true() -> bool {
    true
}

impl Default for PrunerSettings {
    fn default() -> Self {
        Self {
            min_retained_classified: default_min_retained(),
            field_clear_threshold: default_field_clear_threshold(),
            preserve_pairs_default: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarksBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarksConfig {
    #[serde(default)]
    pub backend: MarksBackend,

    /// Directory for the file backend (defaults to `~/.windlass/marks`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl MarksConfig {
    /// The directory the file backend writes to.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| EngineConfig::config_dir().join("marks"))
    }
}

/// A tool schema entry: `[[tools]] name = "read_file", fields = ["path"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchemaConfig {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<String>,
}

impl EngineConfig {
    /// Load configuration from the default path (~/.windlass/config.toml).
    ///
    /// Environment variables override file values:
    /// - `WINDLASS_BUDGET_TOKENS`
    /// - `WINDLASS_MAX_CONTINUATIONS`
    /// - `WINDLASS_MARKS_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("WINDLASS_BUDGET_TOKENS") {
            self.budget.max_context_tokens = parse_env("WINDLASS_BUDGET_TOKENS", &value)?;
        }
        if let Ok(value) = std::env::var("WINDLASS_MAX_CONTINUATIONS") {
            self.continuation.max_continuations = parse_env("WINDLASS_MAX_CONTINUATIONS", &value)?;
        }
        if let Ok(dir) = std::env::var("WINDLASS_MARKS_DIR") {
            self.marks.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".windlass")
    }

    /// The tool schemas declared under `[[tools]]`.
    pub fn schema_registry(&self) -> ToolSchemaRegistry {
        self.tools
            .iter()
            .fold(ToolSchemaRegistry::new(), |reg, tool| {
                reg.with_tool(tool.name.clone(), tool.fields.iter().cloned())
            })
    }

    /// Longest marker the decoder has to recognise across a fragment boundary.
    pub fn longest_marker_len(&self) -> usize {
        let thinking = self
            .decoder
            .thinking_open
            .chars()
            .count()
            .max(self.decoder.thinking_close.chars().count());
        thinking.max(self.schema_registry().longest_marker_len())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "budget.max_context_tokens must be > 0".into(),
            ));
        }

        if self.decoder.thinking_open.is_empty() || self.decoder.thinking_close.is_empty() {
            return Err(ConfigError::ValidationError(
                "decoder thinking markers must not be empty".into(),
            ));
        }

        let longest = self.longest_marker_len();
        if self.decoder.holdback_chars < longest {
            return Err(ConfigError::ValidationError(format!(
                "decoder.holdback_chars ({}) must be at least the longest marker length ({longest})",
                self.decoder.holdback_chars
            )));
        }

        if self.pruner.min_retained_classified == 0 {
            return Err(ConfigError::ValidationError(
                "pruner.min_retained_classified must be >= 1".into(),
            ));
        }

        if self.pruner.field_clear_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "pruner.field_clear_threshold must be > 0".into(),
            ));
        }

        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tool schema with fields {:?} has an empty name",
                tool.fields
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{name} must be a non-negative integer, got '{value}'"))
    })
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.budget.max_context_tokens, 100_000);
        assert_eq!(config.decoder.holdback_chars, 100);
        assert_eq!(config.continuation.max_continuations, 3);
        assert_eq!(config.pruner.min_retained_classified, 6);
        assert_eq!(config.pruner.field_clear_threshold, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.budget.max_context_tokens, config.budget.max_context_tokens);
        assert_eq!(parsed.decoder.thinking_open, "<thinking>");
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().budget.counter, CounterKind::Heuristic);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[budget]
max_context_tokens = 5000
counter = "words"

[[tools]]
name = "read_file"
fields = ["path"]

[[tools]]
name = "write_to_file"
fields = ["path", "content"]
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.budget.max_context_tokens, 5000);
        assert_eq!(config.budget.counter, CounterKind::Words);
        assert_eq!(config.pruner.min_retained_classified, 6);

        let registry = config.schema_registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.fields("write_to_file").unwrap(), ["path", "content"]);
    }

    #[test]
    fn holdback_shorter_than_marker_rejected() {
        let mut config = EngineConfig::default();
        config.decoder.holdback_chars = 5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.decoder.holdback_chars = 12;
        config.tools.push(ToolSchemaConfig {
            name: "replace_in_file_with_context".into(),
            fields: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_floor_and_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.pruner.min_retained_classified = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.pruner.field_clear_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.budget.max_context_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[budget]\nmax_context_tokens = \"lots\"").unwrap();
        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn marks_dir_defaults_under_config_dir() {
        let config = EngineConfig::default();
        assert!(config.marks.resolved_dir().ends_with(".windlass/marks"));
        assert_eq!(config.marks.backend, MarksBackend::File);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("max_context_tokens = 100000"));
        assert!(toml_str.contains("holdback_chars"));
    }
}
