use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::relay::ambient::AmbientConfig;
use crate::relay::gigachat::{self, GigaChatConfig};
use crate::relay::preferences::{SpecialUser, default_special_users};
use crate::relay::router::{DEFAULT_ALIASES, RouterConfig};
use crate::relay::vk;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Ты Сота Сил, Хозяин Заводного города, \
член Трибунала Морровинда, маг, изобретатель и мастер механизмов. \
Ты говоришь спокойно, точно и немного высокомерно, любишь сравнения с шестернями \
и механизмами, ценишь знание и порядок. Ты участвуешь в беседе ВКонтакте: \
отвечай по-русски, кратко и по существу, не выходя из образа.";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    vk_token: String,
    vk_group_id: i64,
    #[serde(default = "default_vk_api_url")]
    vk_api_url: String,
    #[serde(default = "default_vk_api_version")]
    vk_api_version: String,
    /// Answer to the Callback API handshake. Seeds the persisted code.
    confirmation_code: Option<String>,
    /// Callback API secret; events carrying a different `secret` are dropped.
    callback_secret: Option<String>,

    gigachat_auth_key: String,
    #[serde(default = "default_gigachat_scope")]
    gigachat_scope: String,
    #[serde(default = "default_gigachat_model")]
    gigachat_model: String,
    #[serde(default = "default_gigachat_auth_url")]
    gigachat_auth_url: String,
    #[serde(default = "default_gigachat_api_url")]
    gigachat_api_url: String,
    #[serde(default = "default_true")]
    gigachat_accept_invalid_certs: bool,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,

    /// Serper key. Empty disables web search.
    #[serde(default)]
    serper_api_key: String,
    system_prompt: Option<String>,
    /// Extra names the bot answers to, on top of the built-in ones.
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default = "default_history_limit")]
    history_limit: usize,
    /// Directory for state files and logs. Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    /// VK peer that receives forwarded log lines.
    log_peer_id: Option<i64>,
    #[serde(default)]
    dry_run: bool,

    #[serde(default = "default_message_max_age")]
    message_max_age_secs: i64,
    #[serde(default = "default_dedup_retention")]
    dedup_retention_secs: i64,
    #[serde(default = "default_dedup_sweep")]
    dedup_sweep_secs: i64,
    #[serde(default = "default_true")]
    dedup_expire_content_hashes: bool,
    #[serde(default = "default_hostile_cooldown")]
    hostile_cooldown_secs: i64,
    #[serde(default)]
    ambient: AmbientConfig,
    special_users: Option<Vec<SpecialUser>>,
}

fn default_vk_api_url() -> String {
    vk::DEFAULT_API_URL.to_string()
}

fn default_vk_api_version() -> String {
    vk::DEFAULT_API_VERSION.to_string()
}

fn default_gigachat_scope() -> String {
    "GIGACHAT_API_PERS".to_string()
}

fn default_gigachat_model() -> String {
    "GigaChat".to_string()
}

fn default_gigachat_auth_url() -> String {
    gigachat::DEFAULT_AUTH_URL.to_string()
}

fn default_gigachat_api_url() -> String {
    gigachat::DEFAULT_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.35
}

fn default_history_limit() -> usize {
    20
}

fn default_port() -> u16 {
    8000
}

fn default_message_max_age() -> i64 {
    60
}

fn default_dedup_retention() -> i64 {
    300
}

fn default_dedup_sweep() -> i64 {
    60
}

fn default_hostile_cooldown() -> i64 {
    300
}

pub struct Config {
    pub vk_token: String,
    pub vk_group_id: i64,
    pub vk_api_url: String,
    pub vk_api_version: String,
    pub confirmation_code: Option<String>,
    pub callback_secret: Option<String>,
    pub gigachat: GigaChatConfig,
    pub serper_api_key: String,
    pub system_prompt: String,
    /// Built-in aliases followed by configured ones.
    pub aliases: Vec<String>,
    pub history_limit: usize,
    /// Directory for state files (history, preferences, cooldowns, logs).
    pub data_dir: PathBuf,
    pub port: u16,
    pub log_peer_id: Option<i64>,
    pub dry_run: bool,
    pub message_max_age_secs: i64,
    pub dedup_retention_secs: i64,
    pub dedup_sweep_secs: i64,
    pub dedup_expire_content_hashes: bool,
    pub hostile_cooldown_secs: i64,
    pub ambient: AmbientConfig,
    pub special_users: Vec<SpecialUser>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.vk_token.trim().is_empty() {
            return Err(ConfigError::Validation("vk_token is required".into()));
        }
        if file.vk_group_id <= 0 {
            return Err(ConfigError::Validation(
                "vk_group_id must be the positive community id".into(),
            ));
        }
        if file.gigachat_auth_key.trim().is_empty() {
            return Err(ConfigError::Validation("gigachat_auth_key is required".into()));
        }
        if file.history_limit == 0 {
            return Err(ConfigError::Validation("history_limit must be at least 1".into()));
        }
        for (name, p) in [
            ("base_probability", file.ambient.base_probability),
            ("topic_probability", file.ambient.topic_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Validation(format!(
                    "ambient.{name} must be between 0 and 1"
                )));
            }
        }

        let mut aliases: Vec<String> = DEFAULT_ALIASES.iter().map(|a| a.to_string()).collect();
        for alias in file.aliases {
            let alias = alias.trim().to_lowercase();
            if !alias.is_empty() && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            vk_token: file.vk_token,
            vk_group_id: file.vk_group_id,
            vk_api_url: file.vk_api_url,
            vk_api_version: file.vk_api_version,
            confirmation_code: file.confirmation_code.filter(|c| !c.trim().is_empty()),
            callback_secret: file.callback_secret.filter(|s| !s.trim().is_empty()),
            gigachat: GigaChatConfig {
                auth_key: file.gigachat_auth_key,
                scope: file.gigachat_scope,
                model: file.gigachat_model,
                auth_url: file.gigachat_auth_url,
                api_url: file.gigachat_api_url.trim_end_matches('/').to_string(),
                accept_invalid_certs: file.gigachat_accept_invalid_certs,
                max_tokens: file.max_tokens,
                temperature: file.temperature,
            },
            serper_api_key: file.serper_api_key,
            system_prompt: file
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            aliases,
            history_limit: file.history_limit,
            data_dir,
            port: file.port,
            log_peer_id: file.log_peer_id,
            dry_run: file.dry_run,
            message_max_age_secs: file.message_max_age_secs,
            dedup_retention_secs: file.dedup_retention_secs,
            dedup_sweep_secs: file.dedup_sweep_secs,
            dedup_expire_content_hashes: file.dedup_expire_content_hashes,
            hostile_cooldown_secs: file.hostile_cooldown_secs,
            ambient: file.ambient,
            special_users: file.special_users.unwrap_or_else(default_special_users),
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            group_id: self.vk_group_id,
            system_prompt: self.system_prompt.clone(),
            message_max_age_secs: self.message_max_age_secs,
            aliases: self.aliases.clone(),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("user_preferences.json")
    }

    pub fn hostile_state_path(&self) -> PathBuf {
        self.data_dir.join("hostile_responses_state.json")
    }

    pub fn confirmation_path(&self) -> PathBuf {
        self.data_dir.join("confirmation_code.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_minimal_config_defaults() {
        let file = write_config(r#"{
            "vk_token": "vk1.a.token",
            "vk_group_id": 229000000,
            "gigachat_auth_key": "base64key"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");

        assert_eq!(config.vk_api_url, "https://api.vk.com/method/");
        assert_eq!(config.vk_api_version, "5.199");
        assert_eq!(config.gigachat.scope, "GIGACHAT_API_PERS");
        assert_eq!(config.gigachat.max_tokens, 1024);
        assert!(config.gigachat.accept_invalid_certs);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.port, 8000);
        assert_eq!(config.message_max_age_secs, 60);
        assert_eq!(config.dedup_retention_secs, 300);
        assert_eq!(config.dedup_sweep_secs, 60);
        assert!(config.dedup_expire_content_hashes);
        assert_eq!(config.hostile_cooldown_secs, 300);
        assert_eq!(config.ambient.cooldown_secs, 600);
        assert_eq!(config.special_users.len(), 3);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.confirmation_code.is_none());
        assert_eq!(config.history_path(), PathBuf::from("./history.json"));
    }

    #[test]
    fn test_overrides() {
        let file = write_config(r#"{
            "vk_token": "t",
            "vk_group_id": 1,
            "gigachat_auth_key": "k",
            "gigachat_api_url": "https://example.org/api/v1/",
            "confirmation_code": "abc123",
            "callback_secret": "",
            "aliases": ["Механик", "сота"],
            "data_dir": "/var/lib/sotha",
            "ambient": {"base_probability": 0.5},
            "special_users": []
        }"#);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.gigachat.api_url, "https://example.org/api/v1");
        assert_eq!(config.confirmation_code.as_deref(), Some("abc123"));
        assert!(config.callback_secret.is_none());
        assert_eq!(config.aliases.iter().filter(|a| *a == "сота").count(), 1);
        assert!(config.aliases.contains(&"механик".to_string()));
        assert_eq!(config.ambient.base_probability, 0.5);
        assert_eq!(config.ambient.topic_probability, 0.25);
        assert!(config.special_users.is_empty());
        assert_eq!(config.preferences_path(), PathBuf::from("/var/lib/sotha/user_preferences.json"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{"vk_token": "", "vk_group_id": 1, "gigachat_auth_key": "k"}"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("vk_token"));
    }

    #[test]
    fn test_non_positive_group_id() {
        let file = write_config(r#"{"vk_token": "t", "vk_group_id": -5, "gigachat_auth_key": "k"}"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("vk_group_id"));
    }

    #[test]
    fn test_missing_gigachat_key() {
        let file = write_config(r#"{"vk_token": "t", "vk_group_id": 1}"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_zero_history_limit() {
        let file = write_config(
            r#"{"vk_token": "t", "vk_group_id": 1, "gigachat_auth_key": "k", "history_limit": 0}"#,
        );
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("history_limit"));
    }

    #[test]
    fn test_probability_out_of_range() {
        let file = write_config(
            r#"{"vk_token": "t", "vk_group_id": 1, "gigachat_auth_key": "k",
                "ambient": {"topic_probability": 1.5}}"#,
        );
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("topic_probability"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/sotha.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
