//! # Event Relay Server Library
//!
//! This library provides the authority side of an ordered event relay. The
//! authority is the single sender of record: every event it emits is given a
//! permanent index, queued per recipient, and delivered one at a time. An
//! event only counts as delivered once the recipient acknowledges it.
//!
//! ## Delivery Guarantees
//!
//! ### At Most One In Flight
//! Each recipient has at most one transmitted but unacknowledged event. New
//! events queue behind it, so a recipient never sees events out of the order
//! the authority picked for it and never has to reorder.
//!
//! ### Acknowledgement Attribution
//! An acknowledgement only applies to the record bound to the identity that
//! sent it. A recipient cannot acknowledge another recipient's event, and an
//! acknowledgement for an event the record never queued is reported and
//! ignored.
//!
//! ### Shared Broadcast Indices
//! A broadcast is registered once, so every recipient sees the same event
//! index for it. Logs and acknowledgements can be correlated across
//! recipients by that index.
//!
//! ## Module Organization
//!
//! ### Ledger (`ledger`)
//! Append-only history of every event the authority has sent.
//!
//! ### Recipients (`recipient`, `directory`)
//! Per-recipient queues and flags, addressed by a stable index, plus the
//! mapping from live socket addresses to those indices.
//!
//! ### Delivery (`delivery`)
//! The Idle/InFlight state machine: enqueue, send next, acknowledge.
//!
//! ### Session and Dispatch (`session`, `dispatch`)
//! The explicit owner of all relay state and the public send entry points.
//!
//! ### Network (`network`, `transport`)
//! UDP socket handling, the authority loop, and the fire-and-forget
//! transport boundary the delivery controller sends through.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         handle.send_to_all(b"board:start".to_vec()).await;
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod network;
pub mod recipient;
pub mod session;
pub mod transport;
