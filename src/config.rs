//! Usage: Relay configuration (TOML schema + defaults + load helpers).

use crate::services::accounts::Account;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:37821";
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 600;
const DEFAULT_AFFINITY_TTL_SECONDS: i64 = 3600;
const DEFAULT_RESTRICTED_MODEL_TIER: &str = "max";

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECONDS
}

fn default_read_timeout_seconds() -> u64 {
    DEFAULT_READ_TIMEOUT_SECONDS
}

fn default_affinity_ttl_seconds() -> i64 {
    DEFAULT_AFFINITY_TTL_SECONDS
}

fn default_restricted_model_tier() -> String {
    DEFAULT_RESTRICTED_MODEL_TIER.to_string()
}

fn default_tier_restricted_models() -> Vec<String> {
    vec![
        "claude-opus-4-20250514".to_string(),
        "claude-opus-4-1-20250805".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub api_base_url: String,
    /// Optional outbound proxy (http/https/socks5 URL).
    pub proxy_url: Option<String>,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub listen_address: String,
    /// Models only accounts carrying `restricted_model_tier` may serve.
    pub tier_restricted_models: Vec<String>,
    pub restricted_model_tier: String,
    pub affinity_ttl_seconds: i64,
    /// When set, logs are additionally written to daily-rotated files here.
    pub log_directory: Option<String>,
    pub accounts: Vec<AccountConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            proxy_url: None,
            connect_timeout_seconds: default_connect_timeout_seconds(),
            read_timeout_seconds: default_read_timeout_seconds(),
            listen_address: default_listen_address(),
            tier_restricted_models: default_tier_restricted_models(),
            restricted_model_tier: default_restricted_model_tier(),
            affinity_ttl_seconds: default_affinity_ttl_seconds(),
            log_directory: None,
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub organization_id: String,
    pub access_token: String,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub tiers: Vec<String>,
}

impl From<AccountConfig> for Account {
    fn from(config: AccountConfig) -> Self {
        Account {
            organization_id: config.organization_id,
            access_token: config.access_token,
            cookie: config.cookie,
            resets_at: None,
            tiers: config.tiers,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl RelayConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.api_base_url.trim_end_matches('/'))
    }

    /// Tier an account must carry to serve `model`, when restricted.
    pub fn required_tier_for(&self, model: &str) -> Option<&str> {
        if self.tier_restricted_models.iter().any(|m| m == model) {
            Some(self.restricted_model_tier.as_str())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.messages_url(), "https://api.anthropic.com/v1/messages");
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn parses_accounts_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
api_base_url = "https://upstream.example/"
listen_address = "127.0.0.1:4000"

[[accounts]]
organization_id = "org-1"
access_token = "tok-1"
cookie = "cookie-1"
tiers = ["max"]
"#
        )
        .unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.messages_url(), "https://upstream.example/v1/messages");
        assert_eq!(config.listen_address, "127.0.0.1:4000");
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].organization_id, "org-1");
        // Untouched keys keep their defaults.
        assert_eq!(config.read_timeout_seconds, DEFAULT_READ_TIMEOUT_SECONDS);
    }

    #[test]
    fn required_tier_only_for_restricted_models() {
        let config = RelayConfig::default();
        assert_eq!(config.required_tier_for("claude-opus-4-20250514"), Some("max"));
        assert_eq!(config.required_tier_for("claude-haiku-4-20250514"), None);
    }
}
