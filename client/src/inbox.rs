//! Recipient-side record of processed events
//!
//! The server may put an in-flight event on the wire more than once when an
//! acknowledgement is lost. The inbox makes processing idempotent: an index
//! is processed the first time it arrives and only re-acknowledged after.

use shared::EventIndex;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Fresh,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Inbox {
    seen: HashSet<EventIndex>,
    /// Fresh events in arrival order
    history: Vec<(EventIndex, Vec<u8>)>,
    duplicates: usize,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, index: EventIndex, payload: Vec<u8>) -> Receipt {
        if !self.seen.insert(index) {
            self.duplicates += 1;
            return Receipt::Duplicate;
        }
        self.history.push((index, payload));
        Receipt::Fresh
    }

    pub fn history(&self) -> &[(EventIndex, Vec<u8>)] {
        &self.history
    }

    /// Indices of fresh events in the order they were processed
    pub fn indices(&self) -> Vec<EventIndex> {
        self.history.iter().map(|(index, _)| *index).collect()
    }

    pub fn fresh_count(&self) -> usize {
        self.history.len()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn last(&self) -> Option<EventIndex> {
        self.history.last().map(|(index, _)| *index)
    }
}
