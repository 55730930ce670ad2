//! Keeps a local view of the WavePortal contract in sync with the user's wallet and the chain.

pub mod chain;
pub mod config;
pub mod contract;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod test_doubles;
