//! State synchronization
//!
//! This module reconciles the wallet connection, the live `NewWave` subscription and on-demand
//! balance reads into one [`Snapshot`] for presentation:
//!
//! - `controller`: The single writer of session state. Drives the connection lifecycle and
//!   publishes snapshots.
//! - `event_log`: Append-only, deduplicated record of observed waves.
//! - `events`: Decoding of contract data into [`WaveEvent`]s.
//! - `snapshot`: The presentation-facing state model.

/// Connection lifecycle and the actor loop that owns session state
pub mod controller;
/// Append-only wave record
pub mod event_log;
/// Wave event model and decoding
pub mod events;
/// Snapshot handed to presentation
pub mod snapshot;

pub use controller::{Command, SyncController, SyncError, SyncHandle};
pub use event_log::EventLog;
pub use events::{EventDecodeError, EventId, WaveEvent};
pub use snapshot::*;
