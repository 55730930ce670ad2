//! The state value handed to presentation.
//!
//! A [`Snapshot`] is rebuilt from the controller's state after every change and never patched in
//! place, so every field a reader sees was derived from the same controller state.

use super::events::WaveEvent;
use crate::chain::ChainInfo;
use crate::utils::{format_ether, format_ether_fixed};

use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// Rendering of a balance that has not been read yet or whose last read failed.
pub const UNKNOWN_BALANCE: &str = "-";

/// Decimal places shown for the wallet balance.
pub const WALLET_BALANCE_PLACES: u32 = 5;

/// Where the controller is in the connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// An interactive account request is waiting for the user.
    Connecting,
    Connected,
    /// The wallet revoked every account after a session had been established.
    Disconnected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected { account: Address },
}

impl ConnectionState {
    pub fn account(&self) -> Option<Address> {
        match self {
            Self::Connected { account } => Some(*account),
            Self::Disconnected => None,
        }
    }
}

/// Formatted balances. The two fields are refreshed independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    /// Contract balance in ether with trailing zeros trimmed.
    pub contract_balance: String,
    /// Wallet balance in ether with [`WALLET_BALANCE_PLACES`] decimals.
    pub wallet_balance: String,
}

impl BalanceSnapshot {
    pub fn from_wei(contract_balance: Option<U256>, wallet_balance: Option<U256>) -> Self {
        Self {
            contract_balance: contract_balance
                .map(format_ether)
                .unwrap_or_else(|| UNKNOWN_BALANCE.to_string()),
            wallet_balance: wallet_balance
                .map(|wei| format_ether_fixed(wei, WALLET_BALANCE_PLACES))
                .unwrap_or_else(|| UNKNOWN_BALANCE.to_string()),
        }
    }
}

impl Default for BalanceSnapshot {
    fn default() -> Self {
        Self::from_wei(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeSeverity {
    /// The user has to act (e.g. install or configure a wallet) before continuing.
    Blocking,
    Transient,
}

/// User-visible message about the last failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub message: String,
}

impl Notice {
    pub fn blocking(message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Blocking,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            severity: NoticeSeverity::Transient,
            message: message.into(),
        }
    }
}

/// Whether a mined wave paid the sender, judged by the contract balance around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayoutResult {
    Won,
    NotWon,
    /// One of the two balance reads failed.
    Undetermined,
}

impl PayoutResult {
    /// The contract pays winners out of its own balance, so a strict decrease means a payout.
    pub fn classify(before: Option<U256>, after: Option<U256>) -> Self {
        match (before, after) {
            (Some(before), Some(after)) if after < before => Self::Won,
            (Some(_), Some(_)) => Self::NotWon,
            _ => Self::Undetermined,
        }
    }
}

/// Result of the last successfully mined wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaveOutcome {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub payout: PayoutResult,
    pub contract_balance_before: Option<U256>,
    pub contract_balance_after: Option<U256>,
}

/// Everything presentation needs to render the portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub chain: ChainInfo,
    pub balances: BalanceSnapshot,
    pub events: Vec<WaveEvent>,
    pub draft_message: String,
    pub wave_in_flight: bool,
    pub last_wave: Option<WaveOutcome>,
    pub notice: Option<Notice>,
}
