//! Types shared by every caller of the wallet provider: chain metadata and the error taxonomy.

use serde::{Deserialize, Serialize};

/// Display label used when a chain id is not present in [`KNOWN_CHAINS`].
pub const UNKNOWN_CHAIN_NAME: &str = "Unknown";

/// Static id → display name table used to label the connected network.
pub const KNOWN_CHAINS: &[(u64, &str)] = &[
    (1, "Ethereum Mainnet"),
    (3, "Ropsten"),
    (4, "Rinkeby"),
    (5, "Goerli"),
    (42, "Kovan"),
    (56, "BSC Mainnet"),
    (97, "BSC Testnet"),
    (137, "Matic Mainnet"),
    (80001, "Matic Testnet Mumbai"),
    (43113, "Avalanche FUJI C-Chain"),
    (43114, "Avalanche Mainnet C-Chain"),
];

/// The network the wallet is currently pointed at.
///
/// `chain_id` is `None` until the first successful lookup; the display name is then
/// [`UNKNOWN_CHAIN_NAME`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Numeric chain id as reported by `eth_chainId`.
    pub chain_id: Option<u64>,
    /// Human readable name from [`KNOWN_CHAINS`], or [`UNKNOWN_CHAIN_NAME`].
    pub display_name: String,
}

impl ChainInfo {
    /// Resolve a chain id against the static table.
    pub fn from_chain_id(chain_id: u64) -> Self {
        let display_name = KNOWN_CHAINS
            .iter()
            .find(|(id, _)| *id == chain_id)
            .map(|(_, name)| *name)
            .unwrap_or(UNKNOWN_CHAIN_NAME);

        Self {
            chain_id: Some(chain_id),
            display_name: display_name.to_string(),
        }
    }

    /// Placeholder used before any chain id has been observed.
    pub fn unknown() -> Self {
        Self {
            chain_id: None,
            display_name: UNKNOWN_CHAIN_NAME.to_string(),
        }
    }
}

impl Default for ChainInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Failures surfaced by the wallet provider and the contract proxy.
///
/// The variants mirror how the controller reacts: `NoWallet` is shown to the user as a
/// blocking notice, `UserRejected` is only logged, the rest become transient notices.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("No wallet provider is available")]
    NoWallet,

    #[error("User rejected the request")]
    UserRejected,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transaction was rejected by the signer")]
    TransactionRejected,

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}
