//! Agent settings (config file, then environment variables) and the
//! environment setup document.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::episode::{EpisodeLimits, DEFAULT_MAX_INVALID_ACTIONS, DEFAULT_MAX_REPEATED_ACTIONS};
use crate::resolver::{DEFAULT_ACTION_MARKER, DEFAULT_MATCH_THRESHOLD};

pub const ENV_LLM_MODEL: &str = "ALFWORLD_AGENT_LLM_MODEL";
pub const ENV_LLM_BASE_URL: &str = "ALFWORLD_AGENT_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "ALFWORLD_AGENT_LLM_API_KEY";
pub const ENV_LLM_TIMEOUT_MS: &str = "ALFWORLD_AGENT_LLM_TIMEOUT_MS";
pub const ENV_LLM_SYSTEM_PROMPT: &str = "ALFWORLD_AGENT_LLM_SYSTEM_PROMPT";
pub const ENV_MATCH_THRESHOLD: &str = "ALFWORLD_AGENT_MATCH_THRESHOLD";
pub const ENV_ACTION_MARKER: &str = "ALFWORLD_AGENT_ACTION_MARKER";
pub const ENV_MAX_REPEATED_ACTIONS: &str = "ALFWORLD_AGENT_MAX_REPEATED_ACTIONS";
pub const ENV_MAX_INVALID_ACTIONS: &str = "ALFWORLD_AGENT_MAX_INVALID_ACTIONS";
pub const ENV_MAX_AUTO_REPLIES: &str = "ALFWORLD_AGENT_MAX_AUTO_REPLIES";
pub const ENV_REWRITE_HISTORY: &str = "ALFWORLD_AGENT_REWRITE_HISTORY";
pub const ENV_ENV_CONFIG: &str = "ALFWORLD_AGENT_ENV_CONFIG";
pub const ENV_ENV_TIMEOUT_MS: &str = "ALFWORLD_AGENT_ENV_TIMEOUT_MS";
pub const ENV_PROMPTS: &str = "ALFWORLD_AGENT_PROMPTS";
pub const ENV_BASE_PROMPT: &str = "ALFWORLD_AGENT_BASE_PROMPT";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LLM_SYSTEM_PROMPT: &str = "You are a helpful household assistant. Solve the task \
step by step. End every reply with a single line `Action: <command>`.";
pub const DEFAULT_MAX_AUTO_REPLIES: u32 = 50;
pub const DEFAULT_ENV_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_ENV_CONFIG_FILE: &str = "base_config.yaml";
pub const DEFAULT_PROMPTS_FILE: &str = "alfworld_react.json";
pub const DEFAULT_BASE_PROMPT_FILE: &str = "base.txt";
pub const DEFAULT_SPLIT: &str = "eval_out_of_distribution";
pub const DEFAULT_ENV_SEED: u64 = 42;

// ============================================================================
// Config Source
// ============================================================================

/// Key lookup over an optional flat TOML table, falling back to the process
/// environment for keys the table does not set.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    table: Option<toml::Table>,
}

impl ConfigSource {
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Ok(Self::from_env())
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content, path)
    }

    fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let value: toml::Value =
            toml::from_str(content).map_err(|err| ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        match value {
            toml::Value::Table(table) => Ok(Self { table: Some(table) }),
            _ => Err(ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: "root is not a TOML table".to_string(),
            }),
        }
    }

    pub fn from_env() -> Self {
        Self { table: None }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.table
            .as_ref()
            .and_then(|table| table.get(key))
            .and_then(toml_value_to_string)
            .or_else(|| std::env::var(key).ok())
    }
}

fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}

// ============================================================================
// LLM Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub system_prompt: String,
}

impl LlmConfig {
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        Self::from_env_with(|key| source.get(key))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let model = required_env(&mut getter, ENV_LLM_MODEL)?;
        let base_url = required_env(&mut getter, ENV_LLM_BASE_URL)?;
        let api_key = required_env(&mut getter, ENV_LLM_API_KEY)?;
        let timeout_ms = parse_or(&mut getter, ENV_LLM_TIMEOUT_MS, DEFAULT_LLM_TIMEOUT_MS)?;
        let system_prompt = getter(ENV_LLM_SYSTEM_PROMPT)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LLM_SYSTEM_PROMPT.to_string());

        Ok(Self {
            model,
            base_url,
            api_key,
            timeout_ms,
            system_prompt,
        })
    }
}

// ============================================================================
// Episode Settings
// ============================================================================

/// Everything the episode loop needs besides the model endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSettings {
    pub match_threshold: f64,
    pub action_marker: String,
    pub limits: EpisodeLimits,
    pub max_auto_replies: u32,
    /// Rewrite the assistant's last message with the resolved command.
    pub rewrite_history: bool,
    pub env_timeout_ms: u64,
    pub env_config_path: PathBuf,
    pub prompts_path: PathBuf,
    pub base_prompt_path: PathBuf,
}

impl Default for EpisodeSettings {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            action_marker: DEFAULT_ACTION_MARKER.to_string(),
            limits: EpisodeLimits::default(),
            max_auto_replies: DEFAULT_MAX_AUTO_REPLIES,
            rewrite_history: false,
            env_timeout_ms: DEFAULT_ENV_TIMEOUT_MS,
            env_config_path: PathBuf::from(DEFAULT_ENV_CONFIG_FILE),
            prompts_path: PathBuf::from(DEFAULT_PROMPTS_FILE),
            base_prompt_path: PathBuf::from(DEFAULT_BASE_PROMPT_FILE),
        }
    }
}

impl EpisodeSettings {
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        Self::from_env_with(|key| source.get(key))
    }

    pub(crate) fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let match_threshold = parse_or(&mut getter, ENV_MATCH_THRESHOLD, defaults.match_threshold)?;
        if !match_threshold.is_finite() || match_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: ENV_MATCH_THRESHOLD,
                value: match_threshold.to_string(),
            });
        }
        let action_marker = getter(ENV_ACTION_MARKER)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.action_marker);
        let limits = EpisodeLimits {
            max_repeated_actions: parse_positive(
                &mut getter,
                ENV_MAX_REPEATED_ACTIONS,
                DEFAULT_MAX_REPEATED_ACTIONS,
            )?,
            max_invalid_actions: parse_positive(
                &mut getter,
                ENV_MAX_INVALID_ACTIONS,
                DEFAULT_MAX_INVALID_ACTIONS,
            )?,
            ..defaults.limits
        };
        let max_auto_replies =
            parse_positive(&mut getter, ENV_MAX_AUTO_REPLIES, defaults.max_auto_replies)?;
        let rewrite_history = parse_or(&mut getter, ENV_REWRITE_HISTORY, defaults.rewrite_history)?;
        let env_timeout_ms = parse_or(&mut getter, ENV_ENV_TIMEOUT_MS, defaults.env_timeout_ms)?;

        Ok(Self {
            match_threshold,
            action_marker,
            limits,
            max_auto_replies,
            rewrite_history,
            env_timeout_ms,
            env_config_path: getter(ENV_ENV_CONFIG)
                .map(PathBuf::from)
                .unwrap_or(defaults.env_config_path),
            prompts_path: getter(ENV_PROMPTS)
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_path),
            base_prompt_path: getter(ENV_BASE_PROMPT)
                .map(PathBuf::from)
                .unwrap_or(defaults.base_prompt_path),
        })
    }
}

fn required_env<F>(getter: &mut F, key: &'static str) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = getter(key).ok_or(ConfigError::MissingEnv { key })?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyEnv { key });
    }
    Ok(value)
}

fn parse_or<F, T>(getter: &mut F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match getter(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

fn parse_positive<F>(getter: &mut F, key: &'static str, default: u32) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = parse_or(getter, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

// ============================================================================
// Environment Setup Document
// ============================================================================

/// Environment setup parameters, kept as an opaque document and handed to the
/// environment collaborator as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSetupConfig {
    document: serde_json::Value,
    split: String,
    seed: u64,
}

impl Default for EnvSetupConfig {
    fn default() -> Self {
        Self {
            document: serde_json::Value::Object(serde_json::Map::new()),
            split: DEFAULT_SPLIT.to_string(),
            seed: DEFAULT_ENV_SEED,
        }
    }
}

impl EnvSetupConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&content, path)
    }

    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let document: serde_json::Value =
            serde_yaml::from_str(content).map_err(|err| ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        if !document.is_object() {
            return Err(ConfigError::ParseConfigFile {
                path: path.display().to_string(),
                message: "root is not a mapping".to_string(),
            });
        }

        let seed = match document.pointer("/general/random_seed") {
            Some(value) => value.as_u64().ok_or_else(|| ConfigError::InvalidValue {
                key: "general.random_seed",
                value: value.to_string(),
            })?,
            None => DEFAULT_ENV_SEED,
        };
        let config = Self {
            document,
            split: DEFAULT_SPLIT.to_string(),
            seed,
        };
        config.goal_desc_human_anns_prob()?;
        Ok(config)
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    pub fn split(&self) -> &str {
        self.split.as_str()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Probability of using human-annotated goal descriptions, if configured.
    pub fn goal_desc_human_anns_prob(&self) -> Result<Option<f64>, ConfigError> {
        let Some(value) = self.document.pointer("/env/goal_desc_human_anns_prob") else {
            return Ok(None);
        };
        match value.as_f64() {
            Some(prob) if (0.0..=1.0).contains(&prob) => Ok(Some(prob)),
            _ => Err(ConfigError::InvalidValue {
                key: "env.goal_desc_human_anns_prob",
                value: value.to_string(),
            }),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingEnv { key: &'static str },
    EmptyEnv { key: &'static str },
    InvalidValue { key: &'static str, value: String },
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnv { key } => write!(f, "missing env variable: {key}"),
            ConfigError::EmptyEnv { key } => write!(f, "empty env variable: {key}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value}")
            }
            ConfigError::ReadConfigFile { path, message } => {
                write!(f, "read config file failed ({path}): {message}")
            }
            ConfigError::ParseConfigFile { path, message } => {
                write!(f, "parse config file failed ({path}): {message}")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn llm_vars() -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_LLM_MODEL.to_string(), "gpt-4o-mini".to_string());
        vars.insert(
            ENV_LLM_BASE_URL.to_string(),
            "https://api.example.com/v1".to_string(),
        );
        vars.insert(ENV_LLM_API_KEY.to_string(), "secret".to_string());
        vars
    }

    #[test]
    fn llm_config_uses_defaults() {
        let vars = llm_vars();
        let config = LlmConfig::from_env_with(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(config.system_prompt, DEFAULT_LLM_SYSTEM_PROMPT);
        assert_eq!(config.timeout_ms, DEFAULT_LLM_TIMEOUT_MS);
    }

    #[test]
    fn llm_config_requires_model() {
        let mut vars = llm_vars();
        vars.remove(ENV_LLM_MODEL);
        let err = LlmConfig::from_env_with(|key| vars.get(key).cloned()).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv { key: ENV_LLM_MODEL });
    }

    #[test]
    fn llm_config_rejects_bad_timeout() {
        let mut vars = llm_vars();
        vars.insert(ENV_LLM_TIMEOUT_MS.to_string(), "soon".to_string());
        let err = LlmConfig::from_env_with(|key| vars.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_LLM_TIMEOUT_MS));
    }

    #[test]
    fn episode_settings_default_to_documented_constants() {
        let settings = EpisodeSettings::from_env_with(|_| None).unwrap();
        assert_eq!(settings, EpisodeSettings::default());
        assert_eq!(settings.match_threshold, 0.01);
        assert_eq!(settings.limits.max_repeated_actions, 3);
        assert_eq!(settings.limits.max_invalid_actions, 4);
        assert_eq!(settings.max_auto_replies, 50);
    }

    #[test]
    fn episode_settings_read_overrides() {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_MATCH_THRESHOLD.to_string(), "0.2".to_string());
        vars.insert(ENV_MAX_REPEATED_ACTIONS.to_string(), "5".to_string());
        vars.insert(ENV_REWRITE_HISTORY.to_string(), "true".to_string());
        vars.insert(ENV_ACTION_MARKER.to_string(), "ACTION:".to_string());

        let settings = EpisodeSettings::from_env_with(|key| vars.get(key).cloned()).unwrap();
        assert_eq!(settings.match_threshold, 0.2);
        assert_eq!(settings.limits.max_repeated_actions, 5);
        assert_eq!(settings.limits.max_invalid_actions, 4);
        assert!(settings.rewrite_history);
        assert_eq!(settings.action_marker, "ACTION:");
    }

    #[test]
    fn episode_settings_reject_zero_limits() {
        let mut vars = BTreeMap::new();
        vars.insert(ENV_MAX_INVALID_ACTIONS.to_string(), "0".to_string());
        let err = EpisodeSettings::from_env_with(|key| vars.get(key).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_MAX_INVALID_ACTIONS));
    }

    #[test]
    fn config_file_values_take_precedence() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path_buf = std::env::temp_dir().join(format!("alfworld-agent-config-{unique}.toml"));
        let content = r#"
ALFWORLD_AGENT_LLM_MODEL = "gpt-4o-mini"
ALFWORLD_AGENT_LLM_BASE_URL = "https://api.example.com/v1"
ALFWORLD_AGENT_LLM_API_KEY = "secret"
ALFWORLD_AGENT_LLM_TIMEOUT_MS = 4567
ALFWORLD_AGENT_MATCH_THRESHOLD = 0.05
"#;
        std::fs::write(&path_buf, content).unwrap();

        let source = ConfigSource::from_config_file(&path_buf).unwrap();
        std::fs::remove_file(&path_buf).ok();

        let llm = LlmConfig::from_source(&source).unwrap();
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.timeout_ms, 4567);
        let settings = EpisodeSettings::from_source(&source).unwrap();
        assert_eq!(settings.match_threshold, 0.05);
    }

    #[test]
    fn env_setup_reads_seed_and_probability() {
        let content = "env:\n  type: AlfredTWEnv\n  goal_desc_human_anns_prob: 0.0\ngeneral:\n  random_seed: 7\n";
        let config = EnvSetupConfig::from_yaml_str(content, Path::new("base_config.yaml")).unwrap();
        assert_eq!(config.seed(), 7);
        assert_eq!(config.split(), DEFAULT_SPLIT);
        assert_eq!(config.goal_desc_human_anns_prob().unwrap(), Some(0.0));
        assert_eq!(config.document()["env"]["type"], "AlfredTWEnv");
    }

    #[test]
    fn env_setup_rejects_out_of_range_probability() {
        let content = "env:\n  goal_desc_human_anns_prob: 1.5\n";
        let err = EnvSetupConfig::from_yaml_str(content, Path::new("base_config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn env_setup_rejects_scalar_document() {
        let err = EnvSetupConfig::from_yaml_str("42", Path::new("base_config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseConfigFile { .. }));
    }
}
