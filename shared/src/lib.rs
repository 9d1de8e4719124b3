use serde::{Deserialize, Serialize};

/// Position of an event in the authority's ledger. Dense, starting at 0.
pub type EventIndex = u32;

/// Slot of a recipient in the authority's directory. Dense, never reused.
pub type RecipientIndex = u32;

/// Advisory status a recipient reports when acknowledging an event.
pub type StatusCode = u32;

pub const PROTOCOL_VERSION: u32 = 1;
pub const STATUS_OK: StatusCode = 0;
pub const MAX_PACKET_SIZE: usize = 2048;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Ack {
        index: EventIndex,
        status: StatusCode,
    },
    Heartbeat,
    Disconnect,

    Connected {
        recipient: RecipientIndex,
    },
    Event {
        index: EventIndex,
        payload: Vec<u8>,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Ack { .. } => "ack",
            Packet::Heartbeat => "heartbeat",
            Packet::Disconnect => "disconnect",
            Packet::Connected { .. } => "connected",
            Packet::Event { .. } => "event",
            Packet::Disconnected { .. } => "disconnected",
        }
    }
}

/// Largest event payload whose encoded `Packet::Event` fits in one datagram
///
/// The default bincode encoding uses fixed-width integers, so the framing
/// overhead does not depend on the event index.
pub fn max_event_payload() -> usize {
    let empty = Packet::Event {
        index: 0,
        payload: Vec::new(),
    };
    match bincode::serialized_size(&empty) {
        Ok(overhead) => MAX_PACKET_SIZE.saturating_sub(overhead as usize),
        Err(_) => 0,
    }
}
