//! WavePortal contract access
//!
//! Typed read calls, the `wave` write call and `NewWave` event subscription for the single
//! contract this client talks to. Calls are ABI encoded here and sent through a
//! [`ChainLink`](crate::chain::ChainLink).

/// Calldata encoding and return data / log decoding
pub mod abi;
/// Contract proxy trait and its ChainLink-backed implementation
mod proxy;
/// Raw contract data types
mod types;

pub use proxy::{ContractProxy, WavePortalContract};
pub use types::*;
