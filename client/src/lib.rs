//! # Live Client Library
//!
//! This library connects an application to the live relay, either to share a
//! player's presence (sender) or to watch a group on the map (viewer).
//!
//! ## Architecture Overview
//!
//! A [`network::RelayClient`] owns the WebSocket connection and runs as a
//! single task. The embedding application steers it through a cloneable
//! [`network::ClientHandle`] and receives events through a
//! [`handler::RelayHandler`] implementation.
//!
//! ### Relay Path
//! Every attribute a sender publishes goes to the relay, which forwards it to
//! the rest of the group. This path always works and is the fallback for
//! everything else.
//!
//! ### Peer Path
//! When peer-to-peer is enabled, senders additionally open direct channels to
//! the viewers of their group and push deltas over them. Viewers receiving a
//! delta over a channel ask the relay to stop forwarding that player to them
//! and ignore relayed copies until the channel closes. Channel failures only
//! cost bandwidth; the relay path takes over again.
//!
//! ## Module Organization
//!
//! ### Handler Module (`handler`)
//! Callback trait for relay and peer events.
//!
//! ### Peer Module (`peer`)
//! Peer-assist protocol state and the [`peer::PeerNetwork`] abstraction over
//! the peer brokering service.
//!
//! ### Network Module (`network`)
//! Relay connection, handshake, request correlation and the client handle.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::handler::RelayHandler;
//! use client::network::{ClientOptions, RelayClient};
//! use client::peer::NoPeerNetwork;
//! use shared::AttributeUpdate;
//!
//! struct Printer;
//!
//! impl RelayHandler for Printer {
//!     fn on_player(&mut self, update: &AttributeUpdate) {
//!         println!("{:?}", update);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::network::ClientError> {
//!     let options = ClientOptions::viewer("ws://localhost:3000/ws", "my-group")
//!         .with_peer_to_peer(false);
//!     let (client, handle) = RelayClient::new(options, Printer, NoPeerNetwork);
//!
//!     let task = tokio::spawn(client.run());
//!     let status = handle.status().await?;
//!     println!("{} players online", status.group.len());
//!
//!     handle.close();
//!     let _ = task.await;
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod network;
pub mod peer;
