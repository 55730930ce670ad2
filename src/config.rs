//! Runtime configuration for the wave portal client.
//!
//! Values come from the process environment (optionally seeded from a `.env` file). Parsing is
//! kept in [`ClientConfig::from_lookup`] so it can be exercised without touching the real
//! environment.

use ethers::types::Address;
use std::time::Duration;

/// Address of the deployed WavePortal contract.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x6CFfBfbcaE4e6c8Aec0ffC267c88A780C3cbf57F";
/// Gas ceiling attached to every `wave` transaction.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

const ENV_WALLET_RPC_URL: &str = "WAVE_PORTAL_WALLET_RPC_URL";
const ENV_WALLET_WS_URL: &str = "WAVE_PORTAL_WALLET_WS_URL";
const ENV_CONTRACT_ADDRESS: &str = "WAVE_PORTAL_CONTRACT_ADDRESS";
const ENV_GAS_LIMIT: &str = "WAVE_PORTAL_GAS_LIMIT";
const ENV_POLL_INTERVAL_MS: &str = "WAVE_PORTAL_POLL_INTERVAL_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "WAVE_PORTAL_REQUEST_TIMEOUT_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Connection settings for the wallet provider and the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// JSON-RPC endpoint of the wallet. `None` means no wallet is available.
    pub wallet_rpc_url: Option<String>,
    /// WebSocket endpoint used for `eth_subscribe`. Without it, account/chain changes are
    /// polled and live contract events are unavailable.
    pub wallet_ws_url: Option<String>,
    pub contract_address: Address,
    pub gas_limit: u64,
    /// Interval for receipt polling and account/chain change polling.
    pub poll_interval: Duration,
    /// Timeout applied to each HTTP read. Account requests and transaction submission wait on
    /// the user and are not bounded.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wallet_rpc_url: None,
            wallet_ws_url: None,
            contract_address: DEFAULT_CONTRACT_ADDRESS
                .parse()
                .unwrap_or_else(|_| Address::zero()),
            gas_limit: DEFAULT_GAS_LIMIT,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let contract_address = match non_empty(ENV_CONTRACT_ADDRESS) {
            Some(value) => value
                .trim()
                .parse::<Address>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: ENV_CONTRACT_ADDRESS,
                    reason: e.to_string(),
                })?,
            None => defaults.contract_address,
        };

        let gas_limit = parse_number(ENV_GAS_LIMIT, non_empty(ENV_GAS_LIMIT))?
            .unwrap_or(defaults.gas_limit);
        let poll_interval = parse_number(ENV_POLL_INTERVAL_MS, non_empty(ENV_POLL_INTERVAL_MS))?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let request_timeout =
            parse_number(ENV_REQUEST_TIMEOUT_SECS, non_empty(ENV_REQUEST_TIMEOUT_SECS))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout);

        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: ENV_POLL_INTERVAL_MS,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            wallet_rpc_url: non_empty(ENV_WALLET_RPC_URL),
            wallet_ws_url: non_empty(ENV_WALLET_WS_URL),
            contract_address,
            gas_limit,
            poll_interval,
            request_timeout,
        })
    }
}

fn parse_number(key: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key,
                    reason: e.to_string(),
                })
        })
        .transpose()
}
