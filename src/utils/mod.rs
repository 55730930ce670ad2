//!
//! Utility module for the wave portal client.
//!
//! Re-exports formatting helpers used when rendering balances.
/// Wei to ether formatting
pub mod index;

pub use index::{ETHER_DECIMALS, format_ether, format_ether_fixed};
