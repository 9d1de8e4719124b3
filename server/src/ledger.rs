//! Append-only record of every event the authority has sent

use crate::error::DeliveryError;
use log::{debug, error};
use shared::EventIndex;
use std::sync::Arc;

/// An opaque payload with its permanent ledger position
#[derive(Debug, PartialEq, Eq)]
pub struct Event {
    pub index: EventIndex,
    pub payload: Vec<u8>,
}

/// Global, densely indexed event history
///
/// Entries are never mutated or removed. Recipient queues hold `Arc`
/// references into the ledger rather than their own copies.
#[derive(Debug, Default)]
pub struct EventLedger {
    entries: Vec<Arc<Event>>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Index the next appended event will receive, `None` once exhausted
    pub fn next_index(&self) -> Option<EventIndex> {
        index_at(self.entries.len())
    }

    /// Stores a payload and returns the event under its new index
    ///
    /// Refuses the append rather than wrap once every index is taken.
    pub fn append(&mut self, payload: Vec<u8>) -> Option<Arc<Event>> {
        let Some(index) = self.next_index() else {
            error!("{}", DeliveryError::LedgerExhausted);
            return None;
        };
        let event = Arc::new(Event { index, payload });
        self.entries.push(Arc::clone(&event));
        debug!("Registered event {} ({} bytes)", index, event.payload.len());
        Some(event)
    }

    pub fn get(&self, index: EventIndex) -> Option<Arc<Event>> {
        self.entries.get(index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn index_at(len: usize) -> Option<EventIndex> {
    EventIndex::try_from(len).ok()
}
