//! # Event Relay Client Library
//!
//! A recipient for the ordered event relay. The client connects to the
//! authority, processes each event it is sent, and acknowledges it so the
//! authority can move on to the next one.
//!
//! ## Protocol Duties
//!
//! ### Acknowledge Everything
//! The authority keeps exactly one event in flight per recipient. Until that
//! event is acknowledged nothing else is sent, so a client that stops
//! acknowledging simply stalls.
//!
//! ### Idempotent Processing
//! Events can arrive more than once when an acknowledgement is lost and the
//! authority retransmits. The `inbox` processes each index once and
//! re-acknowledges duplicates.
//!
//! ### Advisory Status
//! Acknowledgements carry a status code. Non-zero codes are logged by the
//! authority but do not hold delivery back.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 0, 0.0).await?.with_max_events(10);
//!     client.run().await?;
//!     println!("Processed {:?}", client.inbox().indices());
//!     Ok(())
//! }
//! ```

pub mod inbox;
pub mod network;
