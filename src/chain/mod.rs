//! Wallet/provider integration
//!
//! This module is the sole point of contact with the user's wallet. It defines the
//! [`ChainLink`] capability, a JSON-RPC implementation of it, and the chain metadata and error
//! types shared with the contract and sync layers.

/// JSON-RPC/WebSocket wallet provider
mod client;
/// Capability trait and subscription handles
mod link;
/// Chain metadata and error taxonomy
mod types;

pub use client::{JsonRpcChainLink, RpcError};
pub use link::{ChainLink, ReceiptStatus, Subscription, TransactionCall};
pub use types::*;
