//! Per-recipient delivery state
//!
//! A `RecipientRecord` is created the first time the authority hears from (or
//! addresses) a recipient. It tracks:
//! - The identity the record is bound to, if any
//! - Whether that identity is currently connected
//! - The queue of events still waiting for acknowledgement
//! - The single event currently in flight
//! - The last event the recipient acknowledged
//!
//! A disconnect only detaches the record. Its queue and acknowledgement
//! history survive until the same identity connects again, or until the
//! record is explicitly retired.

use crate::ledger::Event;
use shared::{EventIndex, RecipientIndex};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RecipientRecord {
    /// Directory slot, assigned once
    pub(crate) index: RecipientIndex,
    /// Bound identity; `None` for pre-allocated or retired slots
    pub(crate) identity: Option<SocketAddr>,
    /// Whether the bound identity is currently connected
    pub(crate) attached: bool,
    /// Pending events in insertion order
    pub(crate) queue: Vec<Arc<Event>>,
    pub(crate) last_acknowledged: Option<EventIndex>,
    /// Event transmitted and not yet acknowledged
    pub(crate) outstanding: Option<EventIndex>,
    pub(crate) retired: bool,
    pub(crate) last_seen: Instant,
}

impl RecipientRecord {
    pub fn new(index: RecipientIndex, identity: Option<SocketAddr>) -> Self {
        Self {
            index,
            identity,
            attached: identity.is_some(),
            queue: Vec::new(),
            last_acknowledged: None,
            outstanding: None,
            retired: false,
            last_seen: Instant::now(),
        }
    }

    pub fn index(&self) -> RecipientIndex {
        self.index
    }

    pub fn identity(&self) -> Option<SocketAddr> {
        self.identity
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// The identity events may be transmitted to right now
    pub fn live_identity(&self) -> Option<SocketAddr> {
        self.identity.filter(|_| self.attached)
    }

    pub fn last_acknowledged(&self) -> Option<EventIndex> {
        self.last_acknowledged
    }

    /// True iff exactly one event has been transmitted and not acknowledged
    pub fn waiting_for_response(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn outstanding(&self) -> Option<EventIndex> {
        self.outstanding
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Event indices still queued, head first
    pub fn pending(&self) -> Vec<EventIndex> {
        self.queue.iter().map(|event| event.index).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// The in-flight event, if it is still queued
    pub fn outstanding_event(&self) -> Option<&Arc<Event>> {
        let index = self.outstanding?;
        self.queue.iter().rev().find(|event| event.index == index)
    }

    /// Marks the recipient as recently heard from
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was heard from the recipient within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Marks the connection as gone while keeping the queue
    ///
    /// The in-flight event stays queued and becomes sendable again, so it is
    /// transmitted anew once the recipient reattaches.
    pub(crate) fn detach(&mut self) {
        self.attached = false;
        self.outstanding = None;
    }

    /// Marks the bound identity as connected again
    pub(crate) fn reattach(&mut self) {
        self.attached = true;
        self.touch();
    }

    /// Unbinds the identity and drops everything still queued
    ///
    /// Returns the number of discarded events.
    pub(crate) fn retire(&mut self) -> usize {
        let dropped = self.queue.len();
        self.identity = None;
        self.attached = false;
        self.queue.clear();
        self.outstanding = None;
        self.retired = true;
        dropped
    }
}
