//! Configuration management for the scanner.
//!
//! Loads configuration from environment variables (after `.env`, if present).
//! The ledger endpoint, redeemer key and contract address are required and are
//! checked before any scan is processed.

use crate::submitter::DEFAULT_REDEMPTION_TIMEOUT;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// JSON-RPC endpoint of the ledger
pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
/// Hex private key of the redeemer account
pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
/// Address of the deployed ticket registry
pub const CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";
/// Deadline for send plus confirmation, in seconds
pub const REDEMPTION_TIMEOUT_SECS: &str = "REDEMPTION_TIMEOUT_SECS";
/// Receipt polling interval, in milliseconds
pub const RECEIPT_POLL_INTERVAL_MS: &str = "RECEIPT_POLL_INTERVAL_MS";
/// Socket address for the Prometheus exporter
pub const METRICS_ADDR: &str = "METRICS_ADDR";

const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Configuration could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("missing required configuration: {var}")]
    Missing {
        /// Variable name
        var: &'static str,
    },
    /// A variable is set but cannot be used
    #[error("invalid {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger connection
    pub ledger: LedgerConfig,
    /// Scan session settings
    pub scan: ScanConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

/// Ledger connection settings
#[derive(Clone)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: Url,
    /// Account that signs `markTicketAsUsed`
    pub redeemer: PrivateKeySigner,
    /// Ticket registry contract
    pub contract_address: Address,
    /// How often to poll for a receipt while waiting for confirmation
    pub receipt_poll_interval: Duration,
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("redeemer", &self.redeemer.address())
            .field("contract_address", &self.contract_address)
            .field("receipt_poll_interval", &self.receipt_poll_interval)
            .finish()
    }
}

/// Scan session settings
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Deadline for one redemption (send plus confirmation)
    pub redemption_timeout: Duration,
}

/// Observability settings
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Where to serve Prometheus metrics; disabled when `None`
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through a variable lookup function
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or any
    /// variable fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|value| !value.trim().is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing { var });

        let rpc_url = require(ETH_RPC_URL)?;
        let private_key = require(PRIVATE_KEY)?;
        let contract_address = require(CONTRACT_ADDRESS)?;

        let ledger = LedgerConfig {
            rpc_url: rpc_url
                .trim()
                .parse::<Url>()
                .map_err(|e| ConfigError::Invalid {
                    var: ETH_RPC_URL,
                    reason: e.to_string(),
                })?,
            redeemer: private_key
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    var: PRIVATE_KEY,
                    reason: "not a 32-byte hex private key".to_string(),
                })?,
            contract_address: contract_address.trim().parse().map_err(|_| {
                ConfigError::Invalid {
                    var: CONTRACT_ADDRESS,
                    reason: "not a 0x-prefixed 20-byte address".to_string(),
                }
            })?,
            receipt_poll_interval: get(RECEIPT_POLL_INTERVAL_MS)
                .map(|v| parse_number(RECEIPT_POLL_INTERVAL_MS, &v).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(DEFAULT_RECEIPT_POLL_INTERVAL),
        };

        let scan = ScanConfig {
            redemption_timeout: get(REDEMPTION_TIMEOUT_SECS)
                .map(|v| parse_number(REDEMPTION_TIMEOUT_SECS, &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(DEFAULT_REDEMPTION_TIMEOUT),
        };

        let observability = ObservabilityConfig {
            metrics_addr: get(METRICS_ADDR)
                .map(|v| {
                    v.trim()
                        .parse::<SocketAddr>()
                        .map_err(|e| ConfigError::Invalid {
                            var: METRICS_ADDR,
                            reason: e.to_string(),
                        })
                })
                .transpose()?,
        };

        Ok(Self {
            ledger,
            scan,
            observability,
        })
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (ETH_RPC_URL, "http://localhost:8545"),
            (PRIVATE_KEY, KEY),
            (CONTRACT_ADDRESS, "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        ]
    }

    #[test]
    fn loads_required_values_and_defaults() {
        let config = Config::from_lookup(lookup(&required())).unwrap();

        assert_eq!(config.ledger.rpc_url.as_str(), "http://localhost:8545/");
        assert_eq!(
            config.ledger.contract_address.to_string(),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        );
        assert_eq!(config.scan.redemption_timeout, Duration::from_secs(120));
        assert_eq!(
            config.ledger.receipt_poll_interval,
            Duration::from_millis(1000)
        );
        assert!(config.observability.metrics_addr.is_none());
    }

    #[test]
    fn each_required_variable_is_fatal_when_missing() {
        for missing in [ETH_RPC_URL, PRIVATE_KEY, CONTRACT_ADDRESS] {
            let pairs: Vec<_> = required()
                .into_iter()
                .filter(|(k, _)| *k != missing)
                .collect();
            assert_eq!(
                Config::from_lookup(lookup(&pairs)).unwrap_err(),
                ConfigError::Missing { var: missing }
            );
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut pairs = required();
        pairs[1] = (PRIVATE_KEY, "  ");
        assert_eq!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Missing { var: PRIVATE_KEY }
        );
    }

    #[test]
    fn rejects_malformed_values() {
        let mut pairs = required();
        pairs[2] = (CONTRACT_ADDRESS, "0x1234");
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Invalid {
                var: CONTRACT_ADDRESS,
                ..
            }
        ));

        let mut pairs = required();
        pairs.push((REDEMPTION_TIMEOUT_SECS, "0"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Invalid {
                var: REDEMPTION_TIMEOUT_SECS,
                ..
            }
        ));

        let mut pairs = required();
        pairs.push((METRICS_ADDR, "not-an-addr"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::Invalid {
                var: METRICS_ADDR,
                ..
            }
        ));
    }

    #[test]
    fn optional_values_override_defaults() {
        let mut pairs = required();
        pairs.push((REDEMPTION_TIMEOUT_SECS, "30"));
        pairs.push((RECEIPT_POLL_INTERVAL_MS, "250"));
        pairs.push((METRICS_ADDR, "127.0.0.1:9000"));

        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.scan.redemption_timeout, Duration::from_secs(30));
        assert_eq!(
            config.ledger.receipt_poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.observability.metrics_addr,
            Some("127.0.0.1:9000".parse().unwrap())
        );
    }

    #[test]
    fn debug_redacts_private_key() {
        let config = Config::from_lookup(lookup(&required())).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(&KEY[2..]));
        assert!(rendered.contains("redeemer"));
    }
}
