//! Ledger configuration
//!
//! One [`TokenConfig`] per tracked token, loaded from a YAML file. Field
//! aliases accept the short legacy keys (`rpc`, `address`, `owner`,
//! `interval`, `timeout`).
//!
//! ```yaml
//! mode: debug
//! tokens:
//!   - chain: eth-main
//!     rpc: http://10.1.9.20:8545
//!     name: USDT
//!     from_block: 7534749
//!     address: 0xdac17f958d2ee523a2206206994597c13d831ec7
//!     interval: 2
//!     timeout: 5
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::etl::decoder::ADDRESS_HEX_LEN;
use crate::etl::extractor::RetryPolicy;

const fn default_block_step() -> u64 {
    1
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_rpc_timeout_secs() -> u64 {
    5
}

const fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenConfig {
    /// Free-form chain label, for logs only.
    #[serde(default)]
    pub chain: Option<String>,

    #[serde(alias = "rpc")]
    pub rpc_url: String,

    /// Ledger key; must be unique across tokens.
    pub name: String,

    /// First block fetched when the ledger holds nothing for this token.
    #[serde(default)]
    pub from_block: u64,

    #[serde(default = "default_block_step")]
    pub block_step: u64,

    #[serde(alias = "address")]
    pub contract_address: String,

    #[serde(default, alias = "owner")]
    pub owner_address: Option<String>,

    #[serde(default = "default_poll_interval_secs", alias = "interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_rpc_timeout_secs", alias = "timeout")]
    pub rpc_timeout_secs: u64,

    /// Extra attempts on the same range before it is skipped.
    #[serde(default)]
    pub fetch_retries: u32,
}

impl TokenConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.fetch_retries)
    }

    /// Check a single token's settings and return its parsed RPC URL.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidToken {
            token: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let url = Url::parse(&self.rpc_url)
            .map_err(|e| invalid(format!("invalid rpc_url {:?}: {e}", self.rpc_url)))?;
        if self.block_step == 0 {
            return Err(invalid("block_step must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be at least 1".to_string()));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(invalid("rpc_timeout_secs must be at least 1".to_string()));
        }
        if !is_address(&self.contract_address) {
            return Err(invalid(format!(
                "contract_address {:?} is not a 20-byte hex address",
                self.contract_address
            )));
        }
        if let Some(owner) = &self.owner_address {
            if !is_address(owner) {
                return Err(invalid(format!(
                    "owner_address {owner:?} is not a 20-byte hex address"
                )));
            }
        }

        Ok(url)
    }
}

fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .filter(|digits| digits.len() == ADDRESS_HEX_LEN)
        .is_some_and(|digits| hex::decode(digits).is_ok())
}

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// `debug` raises the default log level.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl LedgerConfig {
    /// Parse a YAML document; `source_name` only labels errors.
    pub fn from_yaml_str(content: &str, source_name: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: source_name.to_string(),
            source,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        Self::from_yaml_str(&raw, &path_str)
    }

    pub fn is_debug(&self) -> bool {
        self.mode.as_deref() == Some("debug")
    }

    /// Split tokens into the runnable ones and the rejected ones.
    ///
    /// A token is rejected when its own settings are invalid or when its name
    /// repeats an earlier token's; rejection never affects other tokens.
    pub fn partition_tokens(&self) -> (Vec<TokenConfig>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut valid = Vec::new();
        let mut rejected = Vec::new();

        for token in &self.tokens {
            if let Err(e) = token.validate() {
                rejected.push(e);
                continue;
            }
            if !seen.insert(token.name.clone()) {
                rejected.push(ConfigError::DuplicateToken(token.name.clone()));
                continue;
            }
            valid.push(token.clone());
        }

        (valid, rejected)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("token {token}: {reason}")]
    InvalidToken { token: String, reason: String },
    #[error("token {0} is configured more than once")]
    DuplicateToken(String),
    #[error("failed to build rpc transport for token {token}: {reason}")]
    Transport { token: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDT: &str = r#"
  - chain: eth-main
    rpc: http://10.1.9.20:8545
    name: USDT
    from_block: 7534749
    block_step: 5
    address: 0xdac17f958d2ee523a2206206994597c13d831ec7
    owner: 0x36928500bc1dcd7af6a2b4008875cc336b927d57
    interval: 2
    timeout: 5
"#;

    fn tokens(entries: &[String]) -> LedgerConfig {
        let content = format!("tokens:{}", entries.concat());
        LedgerConfig::from_yaml_str(&content, "config.yaml").unwrap()
    }

    #[test]
    fn test_parse_legacy_keys() {
        let config =
            LedgerConfig::from_yaml_str(&format!("mode: debug\ntokens:{USDT}"), "config.yaml")
                .unwrap();

        assert!(config.is_debug());
        assert_eq!(config.max_connections, 10);
        let token = &config.tokens[0];
        assert_eq!(token.rpc_url, "http://10.1.9.20:8545");
        assert_eq!(token.contract_address, "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(token.from_block, 7_534_749);
        assert_eq!(token.block_step, 5);
        assert_eq!(token.poll_interval(), Duration::from_secs(2));
        assert_eq!(token.rpc_timeout(), Duration::from_secs(5));
        assert_eq!(token.fetch_retries, 0);
        assert!(token.validate().is_ok());
    }

    #[test]
    fn test_defaults_apply() {
        let token: TokenConfig = serde_yaml::from_str(
            r#"
rpc_url: https://mainnet.example/v3/key
name: DAI
contract_address: "0x6b175474e89094c44da98b954eedeac495271d0f"
"#,
        )
        .unwrap();

        assert_eq!(token.block_step, 1);
        assert_eq!(token.poll_interval_secs, 10);
        assert_eq!(token.rpc_timeout_secs, 5);
        assert!(token.owner_address.is_none());
    }

    #[test]
    fn test_json_document_is_accepted() {
        let config = LedgerConfig::from_yaml_str(
            r#"{ "database_url": "sqlite://ledger.db", "tokens": [] }"#,
            "config.json",
        )
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite://ledger.db"));
        assert!(config.tokens.is_empty());
    }

    #[test]
    fn test_partition_rejects_bad_and_duplicate_tokens() {
        let usdt = USDT.to_string();
        let bad_step = USDT.replace("block_step: 5", "block_step: 0");
        let bad_url = USDT
            .replace("http://10.1.9.20:8545", "not-a-url")
            .replace("USDT", "USDC");
        let bad_address = USDT
            .replace("0xdac17f958d2ee523a2206206994597c13d831ec7", "0xdac17f")
            .replace("USDT", "WETH");
        let config = tokens(&[usdt.clone(), usdt, bad_step, bad_url, bad_address]);

        let (valid, rejected) = config.partition_tokens();
        assert_eq!(valid.len(), 1);
        assert_eq!(rejected.len(), 4);
        assert!(matches!(rejected[0], ConfigError::DuplicateToken(ref n) if n == "USDT"));
        assert!(rejected[1..]
            .iter()
            .all(|e| matches!(e, ConfigError::InvalidToken { .. })));
    }

    #[test]
    fn test_malformed_yaml_names_the_file() {
        let err = LedgerConfig::from_yaml_str("tokens: [unclosed", "tokens.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "tokens.yaml"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LedgerConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
