//! Send/acknowledge protocol for a single recipient record
//!
//! Each record is either Idle or InFlight. Enqueueing onto an Idle record
//! transmits immediately; while InFlight, new events wait in the queue until
//! an acknowledgement frees the slot. At most one event per record is ever
//! outstanding, so a recipient never has to reorder what it receives.
//!
//! All faults are handled here: they are logged, reported through the return
//! value, and leave the record exactly as it was.

use crate::error::DeliveryError;
use crate::ledger::Event;
use crate::recipient::RecipientRecord;
use crate::transport::Transport;
use log::{debug, error, warn};
use shared::{EventIndex, StatusCode, STATUS_OK};
use std::net::SocketAddr;
use std::sync::Arc;

/// Which queued event is transmitted when a record becomes Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SelectionPolicy {
    /// Most recently enqueued entry first
    #[default]
    #[value(name = "newest")]
    NewestFirst,
    /// Submission order
    #[value(name = "oldest")]
    OldestFirst,
}

/// Outcome of handling one inbound acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    Acknowledged,
    Unauthorized,
    UnknownEvent,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryController {
    policy: SelectionPolicy,
}

impl DeliveryController {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    /// Appends an event to the record's queue and sends it if the record is Idle
    pub fn enqueue<T: Transport + ?Sized>(
        &self,
        record: &mut RecipientRecord,
        event: Arc<Event>,
        transport: &T,
    ) {
        debug!("Queued event {} for recipient {}", event.index, record.index);
        record.queue.push(event);

        if !record.waiting_for_response() {
            // Failures are logged inside send_next
            let _ = self.send_next(record, transport);
        }
    }

    /// Transmits the next candidate if the record is Idle
    ///
    /// Returns the index put in flight, or `None` when there was nothing to
    /// do: the record is already InFlight, its queue is empty, or nobody is
    /// connected on it to send to.
    pub fn send_next<T: Transport + ?Sized>(
        &self,
        record: &mut RecipientRecord,
        transport: &T,
    ) -> Result<Option<EventIndex>, DeliveryError> {
        if record.waiting_for_response() || record.retired {
            return Ok(None);
        }

        let candidate = match self.policy {
            SelectionPolicy::NewestFirst => record.queue.last(),
            SelectionPolicy::OldestFirst => record.queue.first(),
        };
        let Some(event) = candidate.cloned() else {
            return Ok(None);
        };

        if record.last_acknowledged == Some(event.index) {
            let err = DeliveryError::DuplicateResend {
                recipient: record.index,
                index: event.index,
            };
            error!("{}", err);
            return Err(err);
        }

        let Some(identity) = record.live_identity() else {
            debug!(
                "Recipient {} is not connected, holding event {}",
                record.index, event.index
            );
            return Ok(None);
        };

        record.outstanding = Some(event.index);
        transport.transmit(identity, event.index, &event.payload);
        debug!("Sent event {} to recipient {}", event.index, record.index);
        Ok(Some(event.index))
    }

    /// Applies an acknowledgement claimed by `sender` for event `index`
    pub fn acknowledge<T: Transport + ?Sized>(
        &self,
        record: &mut RecipientRecord,
        sender: SocketAddr,
        index: EventIndex,
        status: StatusCode,
        transport: &T,
    ) -> AckResult {
        if record.live_identity() != Some(sender) {
            let err = DeliveryError::Unauthorized {
                recipient: record.index,
                index,
                sender,
                bound: record.identity,
            };
            warn!("{}", err);
            return AckResult::Unauthorized;
        }

        let Some(position) = record.queue.iter().rposition(|event| event.index == index) else {
            let err = DeliveryError::UnknownEvent {
                recipient: record.index,
                index,
            };
            error!("{}", err);
            return AckResult::UnknownEvent;
        };

        if status != STATUS_OK {
            let err = DeliveryError::RecipientStatusNonZero {
                recipient: record.index,
                index,
                status,
            };
            warn!("{}", err);
        }

        record.last_acknowledged = Some(index);
        record.outstanding = None;
        record.queue.remove(position);
        debug!("Recipient {} acknowledged event {}", record.index, index);

        // Failures are logged inside send_next
        let _ = self.send_next(record, transport);
        AckResult::Acknowledged
    }
}
