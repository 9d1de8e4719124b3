use crate::inbox::{Inbox, Receipt};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use rand::Rng;
use shared::{
    EventIndex, Packet, RecipientIndex, StatusCode, MAX_PACKET_SIZE, PROTOCOL_VERSION, STATUS_OK,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    recipient: Option<RecipientIndex>,
    connected: bool,

    inbox: Inbox,

    fake_ping_ms: u64,
    fail_rate: f64,
    max_events: Option<usize>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        fail_rate: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            recipient: None,
            connected: false,
            inbox: Inbox::new(),
            fake_ping_ms,
            fail_rate: fail_rate.clamp(0.0, 1.0),
            max_events: None,
        })
    }

    /// Stops `run` after this many fresh events have been processed
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    pub fn recipient(&self) -> Option<RecipientIndex> {
        self.recipient
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Status reported for a freshly processed event
    fn choose_status(&self) -> StatusCode {
        let mut rng = rand::thread_rng();
        if self.fail_rate > 0.0 && rng.gen_bool(self.fail_rate) {
            rng.gen_range(1..=3)
        } else {
            STATUS_OK
        }
    }

    async fn acknowledge(
        &self,
        index: EventIndex,
        status: StatusCode,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.send_packet(&Packet::Ack { index, status }).await
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { recipient } => {
                info!("Connected! Recipient index: {}", recipient);
                self.recipient = Some(recipient);
                self.connected = true;
            }

            Packet::Event { index, payload } => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                match self.inbox.receive(index, payload) {
                    Receipt::Fresh => {
                        let status = self.choose_status();
                        info!("Event {}: {} (status {})", index, text, status);
                        self.acknowledge(index, status).await?;
                    }
                    Receipt::Duplicate => {
                        debug!("Event {} already processed, acknowledging again", index);
                        self.acknowledge(index, STATUS_OK).await?;
                    }
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.recipient = None;
            }

            other => {
                warn!("Unexpected {} packet", other.kind());
            }
        }

        Ok(())
    }

    /// Packet sent on every heartbeat tick
    ///
    /// Until `Connected` arrives the handshake is repeated, since the first
    /// `Connect` datagram may have been lost.
    fn keepalive_packet(&self) -> Packet {
        if self.connected {
            Packet::Heartbeat
        } else {
            Packet::Connect {
                client_version: PROTOCOL_VERSION,
            }
        }
    }

    fn reached_limit(&self) -> bool {
        self.max_events
            .is_some_and(|max| self.inbox.fresh_count() >= max)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut heartbeat_interval = interval(Duration::from_secs(1));
        // The handshake was just sent, skip the immediate first tick
        heartbeat_interval.tick().await;
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                let closing = matches!(packet, Packet::Disconnected { .. });
                                self.handle_packet(packet).await?;
                                if closing {
                                    return Ok(());
                                }
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = heartbeat_interval.tick() => {
                    let packet = self.keepalive_packet();
                    if !self.connected {
                        debug!("Still waiting for the server, resending connect");
                    }
                    self.send_packet(&packet).await?;
                },
            }

            if self.reached_limit() {
                info!("Processed {} events, leaving", self.inbox.fresh_count());
                break;
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
            self.connected = false;
        }

        Ok(())
    }
}
