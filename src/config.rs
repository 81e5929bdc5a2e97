//! Process configuration read from the environment
//!
//! Both binaries read their settings exactly once at start-up. An optional
//! `.env` file is loaded first (see [`load_dotenv`]), then every key is looked
//! up through a lookup function so tests can feed a plain map instead of
//! mutating the real process environment.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Default OpenAI-compatible API base
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-5.2";
/// Default Tavily API base
pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";
/// Default location of the copywriter system prompt
pub const DEFAULT_SYSTEM_PROMPT_PATH: &str = "prompts/copywriter_modelador.md";
/// Default location of the creator transcription library
pub const DEFAULT_TRANSCRIPTIONS_PATH: &str = "transcriptions.json";
/// User id used when a request does not name one
pub const DEFAULT_USER_ID: &str = "influencer-copywriter";
/// Agent service address the front end talks to by default
pub const DEFAULT_AGENT_API_URL: &str = "http://localhost:8000";

/// Errors raised while building configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read system prompt from {path}: {source}")]
    SystemPrompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load a `.env` file from the working directory if one exists.
///
/// A missing file is not an error; a malformed one is logged and ignored.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Configuration of the agent service process
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    /// OpenAI `service_tier` hint (e.g. "flex"); empty string disables it
    pub service_tier: Option<String>,
    pub tavily_api_key: String,
    pub tavily_base_url: String,
    pub database_url: String,
    pub system_prompt_path: PathBuf,
    pub transcriptions_path: PathBuf,
    pub default_user_id: String,
    /// Number of previous turns replayed into the model context
    pub history_runs: usize,
    /// Maximum model rounds that may request tools before a forced answer
    pub max_tool_rounds: usize,
    /// Remember facts about each user across sessions
    pub user_memories: bool,
    pub search_max_results: usize,
    pub otlp_endpoint: Option<String>,
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let service_tier = match lookup("OPENAI_SERVICE_TIER") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v),
            None => Some("flex".to_string()),
        };

        let log_format = match get("LOG_FORMAT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "LOG_FORMAT",
                value: v,
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            service_tier,
            tavily_api_key: required("TAVILY_API_KEY")?,
            tavily_base_url: get("TAVILY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TAVILY_BASE_URL.to_string()),
            database_url: required("DATABASE_URL")?,
            system_prompt_path: get("SYSTEM_PROMPT_PATH")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT_PATH.to_string())
                .into(),
            transcriptions_path: get("TRANSCRIPTIONS_PATH")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTIONS_PATH.to_string())
                .into(),
            default_user_id: get("DEFAULT_USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            history_runs: parse_or(&get, "HISTORY_RUNS", 10)?,
            max_tool_rounds: parse_or(&get, "MAX_TOOL_ROUNDS", 5)?,
            user_memories: flag_or(&get, "ENABLE_USER_MEMORIES", true)?,
            search_max_results: parse_or(&get, "SEARCH_MAX_RESULTS", 5)?,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            log_format,
        })
    }

    /// Read the system prompt file named by the configuration
    pub fn read_system_prompt(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.system_prompt_path).map_err(|source| {
            ConfigError::SystemPrompt {
                path: self.system_prompt_path.clone(),
                source,
            }
        })
    }
}

/// Configuration of the chat front end process
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    pub api_base_url: String,
    pub user_id: String,
    pub log_format: LogFormat,
}

impl FrontendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_format = match get("LOG_FORMAT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "LOG_FORMAT",
                value: v,
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            api_base_url: get("AGENT_API_URL")
                .unwrap_or_else(|| DEFAULT_AGENT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            user_id: get("USER_ID").unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            log_format,
        })
    }
}

fn parse_or<G>(get: &G, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid { key, value: v }),
        None => Ok(default),
    }
}

fn flag_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("OPENAI_API_KEY", "sk-test"),
        ("TAVILY_API_KEY", "tvly-test"),
        ("DATABASE_URL", "postgres://localhost/agent"),
    ];

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::from_lookup(lookup_from(REQUIRED)).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.service_tier.as_deref(), Some("flex"));
        assert_eq!(config.history_runs, 10);
        assert_eq!(config.max_tool_rounds, 5);
        assert!(config.user_memories);
        assert_eq!(config.default_user_id, DEFAULT_USER_ID);
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_missing_required_key_is_fatal() {
        for missing in ["OPENAI_API_KEY", "TAVILY_API_KEY", "DATABASE_URL"] {
            let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(k) if k == missing));
        }
    }

    #[test]
    fn test_blank_required_key_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("OPENAI_API_KEY", "   ");
        let err = ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OPENAI_API_KEY")));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_TOOL_ROUNDS", "many"));
        let err = ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_TOOL_ROUNDS", .. }));
    }

    #[test]
    fn test_user_memories_flag() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ENABLE_USER_MEMORIES", "False"));
        assert!(!ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap().user_memories);

        pairs.pop();
        pairs.push(("ENABLE_USER_MEMORIES", "sometimes"));
        let err = ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ENABLE_USER_MEMORIES", .. }));
    }

    #[test]
    fn test_empty_service_tier_disables_it() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OPENAI_SERVICE_TIER", ""));
        let config = ServiceConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert!(config.service_tier.is_none());
    }

    #[test]
    fn test_frontend_config_trims_trailing_slash() {
        let config = FrontendConfig::from_lookup(lookup_from(&[
            ("AGENT_API_URL", "http://10.0.0.5:8000/"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.5:8000");
        assert_eq!(config.user_id, DEFAULT_USER_ID);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_prompt_file_is_config_error() {
        let mut config = ServiceConfig::from_lookup(lookup_from(REQUIRED)).unwrap();
        config.system_prompt_path = "/definitely/not/here.md".into();
        assert!(matches!(
            config.read_system_prompt(),
            Err(ConfigError::SystemPrompt { .. })
        ));
    }

    #[test]
    fn test_prompt_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Write punchy hooks.").unwrap();

        let mut config = ServiceConfig::from_lookup(lookup_from(REQUIRED)).unwrap();
        config.system_prompt_path = path;
        assert_eq!(config.read_system_prompt().unwrap(), "Write punchy hooks.");
    }
}
