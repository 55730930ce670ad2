//! Wave events as held by the local log.
//!
//! Contract data arrives in two shapes: entries of a full `getAllWaves()` fetch, which carry no
//! on-chain position, and live `NewWave` logs, which do. Both are decoded into [`WaveEvent`]
//! here; epoch-second timestamps become `DateTime<Utc>` and addresses and messages are passed
//! through verbatim.

use crate::contract::{NewWaveLog, RawWave};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// Stable identity of a live event: the transaction that emitted it and its log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventId {
    pub tx_hash: H256,
    pub log_index: U256,
}

/// A wave as shown to the user. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaveEvent {
    pub sender: Address,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Present for events received through the live subscription.
    pub id: Option<EventId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Timestamp {0} is outside the representable range")]
    TimestampOutOfRange(U256),
}

fn decode_timestamp(seconds: U256) -> Result<DateTime<Utc>, EventDecodeError> {
    if seconds > U256::from(i64::MAX as u64) {
        return Err(EventDecodeError::TimestampOutOfRange(seconds));
    }
    DateTime::<Utc>::from_timestamp(seconds.as_u64() as i64, 0)
        .ok_or(EventDecodeError::TimestampOutOfRange(seconds))
}

impl WaveEvent {
    /// Decode an entry of a full fetch.
    pub fn from_raw(raw: RawWave) -> Result<Self, EventDecodeError> {
        Ok(Self {
            sender: raw.waver,
            timestamp: decode_timestamp(raw.timestamp)?,
            message: raw.message,
            id: None,
        })
    }

    /// Decode a live `NewWave` log, keeping its on-chain position as identity when known.
    pub fn from_log(log: NewWaveLog) -> Result<Self, EventDecodeError> {
        let id = match (log.tx_hash, log.log_index) {
            (Some(tx_hash), Some(log_index)) => Some(EventId { tx_hash, log_index }),
            _ => None,
        };
        let mut event = Self::from_raw(log.wave)?;
        event.id = id;
        Ok(event)
    }

    /// True when both events describe the same wave, ignoring identity.
    pub fn same_content(&self, other: &WaveEvent) -> bool {
        self.sender == other.sender
            && self.timestamp == other.timestamp
            && self.message == other.message
    }
}
