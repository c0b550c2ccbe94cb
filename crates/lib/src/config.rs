//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatbridge/config.json`) and environment.
//! Bot secrets may come from the file or from per-bot environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Chat server location.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bot identities; each gets its own realtime connection.
    #[serde(default)]
    pub bots: Vec<BotConfig>,

    /// Multi-party rooms keyed by group name.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,

    /// Routing pipeline limits and command settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Keepalive and reconnect behavior of the realtime connections.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Where normalized requests are submitted.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Optional HTTP status endpoint.
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Base URL of the chat server (http/https). Overridden by CHATBRIDGE_SERVER_URL env.
    #[serde(default = "default_server_url")]
    pub url: String,
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

/// One bot identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Agent this bot is bound to. Defaults to the username.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Login password. Overridden by CHATBRIDGE_BOT_<USERNAME>_PASSWORD env.
    #[serde(default)]
    pub password: Option<String>,
    /// User id for token login (used together with authToken).
    #[serde(default)]
    pub user_id: Option<String>,
    /// Resume token; when set together with userId, password login is skipped.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl BotConfig {
    pub fn agent_id(&self) -> String {
        self.agent_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.username)
            .to_string()
    }
}

/// Group (multi-party room) settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// Room id. When absent, the id is looked up by group name at startup.
    #[serde(default)]
    pub room_id: Option<String>,
    /// Only respond when a bot is explicitly mentioned.
    #[serde(default)]
    pub require_mention: bool,
    /// Bot usernames that are members of this group.
    #[serde(default)]
    pub bots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Maximum characters per outbound message.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Ambient history entries kept per group room.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: char,
    /// Extra natural-language aliases: phrase -> canonical command name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

fn default_max_message_length() -> usize {
    4000
}

fn default_dedup_ttl_secs() -> u64 {
    60
}

fn default_dedup_capacity() -> usize {
    1000
}

fn default_history_limit() -> usize {
    10
}

fn default_command_prefix() -> char {
    '/'
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            dedup_capacity: default_dedup_capacity(),
            history_limit: default_history_limit(),
            command_prefix: default_command_prefix(),
            aliases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_reconnect_min_secs")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    /// Consecutive authentication failures after which reconnecting stops. None = never stop.
    #[serde(default)]
    pub max_auth_failures: Option<u32>,
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_reconnect_min_secs() -> u64 {
    1
}

fn default_reconnect_max_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            reconnect_min_secs: default_reconnect_min_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            max_auth_failures: None,
        }
    }
}

impl ConnectionConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_secs(self.reconnect_min_secs.max(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs.max(self.reconnect_min_secs).max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Endpoint receiving normalized requests (NDJSON reply stream). Unset = no agent available.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_status_bind")]
    pub bind: String,
    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    15152
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_status_bind(),
            port: default_status_port(),
        }
    }
}

/// Secret used to log a bot in.
#[derive(Clone, PartialEq, Eq)]
pub enum BotCredential {
    Password(String),
    Token { user_id: String, token: String },
}

impl std::fmt::Debug for BotCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotCredential::Password(_) => f.write_str("Password(..)"),
            BotCredential::Token { user_id, .. } => {
                f.debug_struct("Token").field("user_id", user_id).finish_non_exhaustive()
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Environment variable holding a bot's password, e.g. CHATBRIDGE_BOT_ALICE_BOT_PASSWORD.
pub fn bot_password_env_var(username: &str) -> String {
    let upper: String = username
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CHATBRIDGE_BOT_{}_PASSWORD", upper)
}

/// Resolve a bot's credential: env password overrides config; token login when userId and authToken are both set.
pub fn resolve_bot_credential(bot: &BotConfig) -> Option<BotCredential> {
    if let Some(password) = non_empty_env(&bot_password_env_var(&bot.username)) {
        return Some(BotCredential::Password(password));
    }
    if let (Some(user_id), Some(token)) = (non_empty(bot.user_id.as_ref()), non_empty(bot.auth_token.as_ref())) {
        return Some(BotCredential::Token { user_id, token });
    }
    non_empty(bot.password.as_ref()).map(BotCredential::Password)
}

/// Resolve the server URL: env CHATBRIDGE_SERVER_URL overrides config.
pub fn resolve_server_url(config: &Config) -> String {
    non_empty_env("CHATBRIDGE_SERVER_URL")
        .unwrap_or_else(|| config.server.url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATBRIDGE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".chatbridge").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_router_limits() {
        let config = Config::default();
        assert_eq!(config.router.max_message_length, 4000);
        assert_eq!(config.router.dedup_ttl_secs, 60);
        assert_eq!(config.router.dedup_capacity, 1000);
        assert_eq!(config.router.history_limit, 10);
        assert_eq!(config.router.command_prefix, '/');
        assert_eq!(config.connection.reconnect_min(), Duration::from_secs(1));
        assert_eq!(config.connection.reconnect_max(), Duration::from_secs(30));
        assert!(config.connection.max_auth_failures.is_none());
        assert!(!config.status.enabled);
    }

    #[test]
    fn parses_camel_case_file() {
        let json = r#"{
            "server": { "url": "https://chat.example.com/" },
            "bots": [{ "username": "alice-bot", "displayName": "Alice", "password": "pw" }],
            "groups": { "team": { "requireMention": true, "bots": ["alice-bot"] } },
            "router": { "maxMessageLength": 2000, "aliases": { "start over": "new" } },
            "connection": { "maxAuthFailures": 5 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.bots.len(), 1);
        assert_eq!(config.bots[0].agent_id(), "alice-bot");
        assert_eq!(config.bots[0].display_name.as_deref(), Some("Alice"));
        let team = &config.groups["team"];
        assert!(team.require_mention);
        assert!(team.room_id.is_none());
        assert_eq!(config.router.max_message_length, 2000);
        assert_eq!(config.router.dedup_capacity, 1000);
        assert_eq!(config.router.aliases["start over"], "new");
        assert_eq!(config.connection.max_auth_failures, Some(5));
        assert_eq!(config.connection.keepalive_secs, 10);
    }

    #[test]
    fn password_env_var_name_is_sanitized() {
        assert_eq!(
            bot_password_env_var("alice-bot.v2"),
            "CHATBRIDGE_BOT_ALICE_BOT_V2_PASSWORD"
        );
    }

    #[test]
    fn token_login_needs_both_fields() {
        let mut bot = BotConfig {
            username: "cfg-token-bot".to_string(),
            auth_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_bot_credential(&bot), None);
        bot.user_id = Some("uid".to_string());
        assert_eq!(
            resolve_bot_credential(&bot),
            Some(BotCredential::Token {
                user_id: "uid".to_string(),
                token: "tok".to_string()
            })
        );
    }

    #[test]
    fn blank_password_is_no_credential() {
        let bot = BotConfig {
            username: "cfg-blank-bot".to_string(),
            password: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_bot_credential(&bot), None);
    }

    #[test]
    fn explicit_agent_id_wins() {
        let bot = BotConfig {
            username: "alice-bot".to_string(),
            agent_id: Some("research".to_string()),
            ..Default::default()
        };
        assert_eq!(bot.agent_id(), "research");
    }
}
