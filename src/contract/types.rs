use crate::chain::ChainError;

use ethers::types::{Address, H256, U256};

/// One entry of `getAllWaves()` as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWave {
	pub waver: Address,
	/// Block timestamp in epoch seconds.
	pub timestamp: U256,
	pub message: String,
}

/// A decoded `NewWave` log, with the position that identifies it on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWaveLog {
	pub wave: RawWave,
	pub tx_hash: Option<H256>,
	pub log_index: Option<U256>,
	/// Set by the node when the log was dropped by a re-org.
	pub removed: bool,
}

/// A `wave` transaction that has been included in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedWave {
	pub tx_hash: H256,
	pub block_number: Option<u64>,
}

/// Errors decoding contract return data or logs
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
	#[error("ABI decode error: {0}")]
	Decode(#[from] ethers::abi::Error),

	#[error("Unexpected ABI shape: {0}")]
	UnexpectedShape(String),
}

impl From<AbiError> for ChainError {
	fn from(error: AbiError) -> Self {
		ChainError::Provider(error.to_string())
	}
}
