//! Append-only record of observed `NewWave` events.
//!
//! The log is filled once per session from a full fetch ([`EventLog::load_initial`]) and then
//! grows through live pushes ([`EventLog::append`]). Live events and the full fetch can overlap:
//! an event emitted while the fetch is in flight may arrive through both paths. Two rules keep
//! the log free of those duplicates:
//!
//! - a live event whose [`EventId`] was already appended is ignored;
//! - a live event with the same content as a loaded entry that no earlier live event has
//!   matched is treated as that entry and not appended again.
//!
//! Events without an id (programmatic appends) are always appended.

use super::events::{EventId, WaveEvent};
use crate::contract::RawWave;

use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<WaveEvent>,
    /// Ids of live events already recorded or matched against the loaded prefix.
    seen: HashSet<EventId>,
    /// Length of the prefix produced by the last full load.
    loaded: usize,
    /// Indices in the loaded prefix that a live event has already been matched to.
    claimed: HashSet<usize>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with the decoded form of a full fetch.
    ///
    /// Entries whose timestamp cannot be represented are skipped with a warning. Returns the
    /// number of entries loaded.
    pub fn load_initial(&mut self, raw_events: Vec<RawWave>) -> usize {
        let total = raw_events.len();
        self.events = raw_events
            .into_iter()
            .filter_map(|raw| match WaveEvent::from_raw(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping wave from full fetch: {}", e);
                    None
                }
            })
            .collect();
        self.loaded = self.events.len();
        self.seen.clear();
        self.claimed.clear();

        debug!("Loaded {} of {} waves from full fetch", self.loaded, total);
        self.loaded
    }

    /// Add an event at the end. Returns `false` when the event was recognised as a duplicate.
    pub fn append(&mut self, event: WaveEvent) -> bool {
        if let Some(id) = event.id {
            if !self.seen.insert(id) {
                debug!("Ignoring already recorded wave {:?}", id);
                return false;
            }
            if let Some(index) = self.unclaimed_loaded_match(&event) {
                self.claimed.insert(index);
                debug!("Live wave {:?} already present from full fetch", id);
                return false;
            }
        }

        self.events.push(event);
        true
    }

    /// Most recent loaded entry with the same content that is not yet claimed.
    fn unclaimed_loaded_match(&self, event: &WaveEvent) -> Option<usize> {
        self.events[..self.loaded]
            .iter()
            .enumerate()
            .rev()
            .find(|(index, loaded)| !self.claimed.contains(index) && loaded.same_content(event))
            .map(|(index, _)| index)
    }

    /// Copy of the current ordered sequence. Later mutation is not visible through it.
    pub fn snapshot(&self) -> Vec<WaveEvent> {
        self.events.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
