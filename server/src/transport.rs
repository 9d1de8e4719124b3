//! Outbound boundary between the registry and the wire

use log::error;
use shared::{EventIndex, Packet};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Fire-and-forget delivery of one event to one recipient
///
/// Implementations must not block. Retrying on the wire is the transport's
/// business; the registry never awaits the result.
pub trait Transport {
    fn transmit(&self, identity: SocketAddr, index: EventIndex, payload: &[u8]);
}

impl<T: Transport + ?Sized> Transport for &T {
    fn transmit(&self, identity: SocketAddr, index: EventIndex, payload: &[u8]) {
        (**self).transmit(identity, index, payload)
    }
}

/// Messages consumed by the network sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Transport that hands packets to the UDP sender task
#[derive(Debug, Clone)]
pub struct UdpTransport {
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl UdpTransport {
    pub fn new(outbound_tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { outbound_tx }
    }

    /// Queues an arbitrary packet, used for connection control replies
    pub fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }
}

impl Transport for UdpTransport {
    fn transmit(&self, identity: SocketAddr, index: EventIndex, payload: &[u8]) {
        self.send_packet(
            Packet::Event {
                index,
                payload: payload.to_vec(),
            },
            identity,
        );
    }
}
