//! Error types for the relay server
//!
//! `DeliveryError` never reaches the server loop. Each variant is logged
//! where it happens and the affected state is left as it was, so one
//! confused recipient cannot disturb the others.

use shared::{EventIndex, RecipientIndex, StatusCode};
use std::net::SocketAddr;
use thiserror::Error;

/// Protocol faults detected while driving a single recipient record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Acknowledgement came from an identity not bound to the record
    #[error("Recipient {recipient} rejected ack for event {index} from {sender} (bound to {bound:?})")]
    Unauthorized {
        recipient: RecipientIndex,
        index: EventIndex,
        sender: SocketAddr,
        bound: Option<SocketAddr>,
    },

    /// Acknowledged index is not in the record's queue
    #[error("Event {index} acknowledged by recipient {recipient} not found in queue")]
    UnknownEvent {
        recipient: RecipientIndex,
        index: EventIndex,
    },

    /// Next candidate is the event that was just acknowledged
    #[error("Attempted to resend already acknowledged event {index} to recipient {recipient}")]
    DuplicateResend {
        recipient: RecipientIndex,
        index: EventIndex,
    },

    /// Recipient accepted the event but reported a non-zero status
    #[error("Received non-zero status code {status} from recipient {recipient} for event {index}")]
    RecipientStatusNonZero {
        recipient: RecipientIndex,
        index: EventIndex,
        status: StatusCode,
    },

    /// Encoded event would not fit in a single datagram
    #[error("Payload of {size} bytes exceeds the {limit} byte event limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Every representable event index has been handed out
    #[error("Event ledger is exhausted, no index left for a new event")]
    LedgerExhausted,
}

/// Failures of directory maintenance operations (`bind`, lookups by handle)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Recipient {0} does not exist")]
    UnknownRecipient(RecipientIndex),

    #[error("Recipient {recipient} is already bound to {identity}")]
    AlreadyBound {
        recipient: RecipientIndex,
        identity: SocketAddr,
    },

    #[error("Identity {identity} is already bound to recipient {recipient}")]
    IdentityInUse {
        identity: SocketAddr,
        recipient: RecipientIndex,
    },

    #[error("Recipient {0} has been retired")]
    Retired(RecipientIndex),

    #[error("Recipient directory is exhausted, no index left to allocate")]
    Exhausted,
}

/// Errors surfaced by the network server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}
