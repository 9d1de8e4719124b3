//! Server network layer: UDP I/O and the authority loop
//!
//! The loop owns the `AuthoritySession` and is the only place it is mutated.
//! Receiving and sending run on their own tasks and talk to the loop through
//! channels, so every enqueue, send and acknowledgement for a recipient is
//! serialized without any locking.

use crate::config::ServerConfig;
use crate::delivery::AckResult;
use crate::error::ServerError;
use crate::session::AuthoritySession;
use crate::transport::{OutboundMessage, Transport, UdpTransport};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, RecipientIndex, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// A decoded packet handed from the receiver task to the main loop
#[derive(Debug)]
pub struct Inbound {
    pub packet: Packet,
    pub addr: SocketAddr,
}

/// Requests from authority game logic
#[derive(Debug)]
pub enum Command {
    SendTo {
        recipient: RecipientIndex,
        payload: Vec<u8>,
    },
    SendToAll {
        payload: Vec<u8>,
    },
    Shutdown,
}

/// Cloneable entry point for code that wants to dispatch events
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::Sender<Command>,
}

impl ServerHandle {
    /// Returns false if the server loop has stopped
    pub async fn send_to(&self, recipient: RecipientIndex, payload: Vec<u8>) -> bool {
        self.commands
            .send(Command::SendTo { recipient, payload })
            .await
            .is_ok()
    }

    pub async fn send_to_all(&self, payload: Vec<u8>) -> bool {
        self.commands
            .send(Command::SendToAll { payload })
            .await
            .is_ok()
    }

    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Server loop already stopped");
        }
    }
}

/// Main server coordinating the socket and the relay session
pub struct Server {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: ServerConfig,
    session: AuthoritySession<UdpTransport>,
    heartbeat_count: u64,

    // Communication channels
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        let local_addr = socket.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(1000);

        let session = AuthoritySession::new(UdpTransport::new(outbound_tx), config.selection_policy);

        Ok(Server {
            socket,
            local_addr,
            config,
            session,
            heartbeat_count: 0,
            inbound_tx,
            inbound_rx,
            outbound_rx: Some(outbound_rx),
            command_tx,
            command_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.command_tx.clone(),
        }
    }

    pub fn session(&self) -> &AuthoritySession<UdpTransport> {
        &self.session
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let inbound_tx = self.inbound_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) = inbound_tx.send(Inbound { packet, addr }) {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            warn!("Network sender already running");
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send {} packet to {}: {}", packet.kind(), addr, e);
                        }
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn reply(&self, packet: Packet, addr: SocketAddr) {
        self.session.transport().send_packet(packet, addr);
    }

    /// Processes one inbound packet
    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Recipient connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.reply(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                let known = self.session.lookup(addr);
                if let Some(recipient) = known {
                    if self.session.touch(addr) {
                        info!("Recipient {} reconnected from {}", recipient, addr);
                        self.reply(Packet::Connected { recipient }, addr);
                        return;
                    }
                }

                if self.session.directory().live_count() >= self.config.max_recipients {
                    self.reply(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A returning recipient hears Connected before its backlog
                if let Some(recipient) = known {
                    self.reply(Packet::Connected { recipient }, addr);
                }

                let recipient = match self.session.resolve(addr) {
                    Ok(recipient) => recipient,
                    Err(e) => {
                        error!("Cannot register {}: {}", addr, e);
                        self.reply(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                        return;
                    }
                };

                if known.is_none() {
                    self.reply(Packet::Connected { recipient }, addr);
                    if let Some(payload) = self.config.welcome_payload.clone() {
                        self.session.send_to_recipient(recipient, payload);
                    }
                }
            }

            Packet::Ack { index, status } => {
                if !self.session.touch(addr) {
                    warn!("Ack for event {} from unconnected {}", index, addr);
                    self.reply(
                        Packet::Disconnected {
                            reason: "Not connected".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                match self.session.on_acknowledgement(addr, index, status) {
                    AckResult::Acknowledged => {}
                    other => debug!("Ack for event {} from {}: {:?}", index, addr, other),
                }
            }

            Packet::Heartbeat => {
                if !self.session.touch(addr) {
                    debug!("Heartbeat from unconnected {}", addr);
                }
            }

            Packet::Disconnect => {
                self.session.detach(addr);
            }

            other => {
                warn!("Unexpected {} packet from {}", other.kind(), addr);
            }
        }
    }

    /// Applies one authority command; returns false on shutdown
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SendTo { recipient, payload } => {
                self.session.send_to_recipient(recipient, payload);
            }
            Command::SendToAll { payload } => {
                self.session.send_to_all(payload);
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Puts every in-flight event back on the wire without touching state
    fn retransmit_outstanding(&self) {
        let transport = self.session.transport();
        let mut count = 0;
        for (identity, event) in self.session.outstanding() {
            transport.transmit(identity, event.index, &event.payload);
            count += 1;
        }
        if count > 0 {
            debug!("Retransmitted {} in-flight events", count);
        }
    }

    fn broadcast_heartbeat(&mut self) {
        self.heartbeat_count += 1;
        let payload = format!("heartbeat {}", self.heartbeat_count).into_bytes();
        self.session.send_to_all(payload);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut timeout_interval = interval(Duration::from_secs(1));
        let mut resend_interval = self.config.resend_interval.map(delayed_interval);
        let mut broadcast_interval = self.config.broadcast_interval.map(delayed_interval);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.inbound_rx.recv() => {
                    match message {
                        Some(Inbound { packet, addr }) => self.handle_packet(packet, addr),
                        None => {
                            info!("Inbound channel closed, shutting down");
                            break;
                        }
                    }
                },

                command = self.command_rx.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        None => false,
                    };
                    if !keep_running {
                        info!("Server shutting down");
                        break;
                    }
                },

                _ = timeout_interval.tick() => {
                    let expired = self.session.expire(self.config.client_timeout);
                    if !expired.is_empty() {
                        debug!("{} recipients timed out", expired.len());
                    }
                    if let Some(after) = self.config.archive_after {
                        self.session.archive(after);
                    }
                },

                _ = maybe_tick(&mut resend_interval) => {
                    self.retransmit_outstanding();
                },

                _ = maybe_tick(&mut broadcast_interval) => {
                    self.broadcast_heartbeat();
                },
            }
        }

        Ok(())
    }
}

/// Interval whose first tick fires one period from now
fn delayed_interval(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn maybe_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
