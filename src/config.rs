//! Engine policies and server settings.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// What happens to the other pending requests on an item when one is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingPolicy {
    /// Siblings stay pending. They cannot be accepted while the item is not
    /// available; the owner may reject them or leave them stale.
    #[default]
    LeavePending,
    /// Siblings are rejected in the same atomic unit as the acceptance.
    AutoReject,
}

impl std::str::FromStr for SiblingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave_pending" => Ok(SiblingPolicy::LeavePending),
            "auto_reject" => Ok(SiblingPolicy::AutoReject),
            _ => Err(format!("Invalid sibling policy: {}", s)),
        }
    }
}

/// Configuration for the exchange engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Handling of sibling requests on acceptance
    pub sibling_policy: SiblingPolicy,

    /// Whether participants may keep posting on a rejected request.
    /// Reading the history is always allowed.
    pub allow_messages_on_rejected: bool,

    /// Maximum item title length in characters
    pub max_title_len: usize,

    /// Maximum length of free text (descriptions, request notes, messages)
    pub max_text_len: usize,

    /// Maximum number of image references on an item
    pub max_images: usize,

    /// Polling interval advertised to chat consumers (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            sibling_policy: SiblingPolicy::LeavePending,
            allow_messages_on_rejected: true,
            max_title_len: 200,
            max_text_len: 4000,
            max_images: 10,
            poll_interval_ms: 5000, // Clients re-fetch chat every 5 seconds
        }
    }
}

/// Settings for the `handover` server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; in-memory storage is used when absent
    pub database_url: Option<String>,
    /// Optional read replica, used for listings only
    pub database_replica_url: Option<String>,
    pub exchange: ExchangeConfig,
}

impl ServerConfig {
    /// Read settings from the environment (after loading `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("HANDOVER_BIND")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid HANDOVER_BIND: {}", e))?;

        let mut exchange = ExchangeConfig::default();
        if let Some(policy) = lookup("HANDOVER_SIBLING_POLICY") {
            exchange.sibling_policy = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(allow) = lookup("HANDOVER_ALLOW_MESSAGES_ON_REJECTED") {
            exchange.allow_messages_on_rejected = allow
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid HANDOVER_ALLOW_MESSAGES_ON_REJECTED: {}", e))?;
        }
        if let Some(interval) = lookup("HANDOVER_POLL_INTERVAL_MS") {
            exchange.poll_interval_ms = interval
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid HANDOVER_POLL_INTERVAL_MS: {}", e))?;
        }

        Ok(Self {
            bind_addr,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_replica_url: lookup("DATABASE_REPLICA_URL").filter(|url| !url.is_empty()),
            exchange,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8000".parse().unwrap());
        assert!(config.database_url.is_none());
        assert!(config.database_replica_url.is_none());
        assert_eq!(config.exchange.sibling_policy, SiblingPolicy::LeavePending);
        assert!(config.exchange.allow_messages_on_rejected);
        assert_eq!(config.exchange.poll_interval_ms, 5000);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HANDOVER_BIND", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/handover"),
            ("DATABASE_REPLICA_URL", "postgres://replica/handover"),
            ("HANDOVER_SIBLING_POLICY", "auto_reject"),
            ("HANDOVER_ALLOW_MESSAGES_ON_REJECTED", "false"),
            ("HANDOVER_POLL_INTERVAL_MS", "2500"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/handover")
        );
        assert_eq!(
            config.database_replica_url.as_deref(),
            Some("postgres://replica/handover")
        );
        assert_eq!(config.exchange.sibling_policy, SiblingPolicy::AutoReject);
        assert!(!config.exchange.allow_messages_on_rejected);
        assert_eq!(config.exchange.poll_interval_ms, 2500);
    }

    #[test]
    fn test_invalid_policy_is_an_error() {
        let result = ServerConfig::from_lookup(lookup(&[("HANDOVER_SIBLING_POLICY", "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_exchange_config_deserializes_partial() {
        let config: ExchangeConfig =
            serde_json::from_str(r#"{"sibling_policy":"auto_reject"}"#).unwrap();
        assert_eq!(config.sibling_policy, SiblingPolicy::AutoReject);
        assert_eq!(config.max_text_len, 4000);
    }
}
