//! # Live Relay Server Library
//!
//! This library provides the real-time presence relay behind the live map. Players
//! running the companion app share where they are; anyone holding the same group
//! token can watch them move on the map in real time.
//!
//! ## Core Responsibilities
//!
//! ### Group Registry
//! Tracks which connections belong to which group and the last attribute each
//! authoritative participant published (position, location, region, world, map,
//! username). Passive viewers join the group's room but never get an entry.
//!
//! ### Fan-Out
//! Every accepted attribute publish is forwarded to the other members of the
//! sender's room, except viewers that already receive that participant over a
//! direct peer channel.
//!
//! ### Respawn Ledger
//! Players report when looted markers respawn. Reports are relayed to the room,
//! stored with an absolute deadline and served back with the remaining time.
//! Expired entries are swept periodically.
//!
//! ### HTTP Surface
//! A small read-only API exposes liveness, relay and host statistics, a public
//! player listing, pending respawns and group lookups for dashboards.
//!
//! ## Architecture Design
//!
//! ### Single Owner Relay
//! All live state belongs to one actor task ([`relay::Relay`]). WebSocket tasks
//! and HTTP handlers only hold a [`relay::RelayHandle`] and talk to the actor
//! over channels, so every mutation is applied in order and no state is ever
//! locked. The respawn sweep runs inside the same loop.
//!
//! ### One Port
//! The WebSocket endpoint (`/ws`) and the HTTP API (`/api/live/...`) are served
//! by the same axum router.
//!
//! ### JSON Frames
//! Frames are `{"event", "data"}` JSON text messages, readable by browsers and
//! the companion app alike. See the `shared` crate for the full protocol.
//!
//! ## Module Organization
//!
//! - `registry`: groups and participants
//! - `respawn`: respawn ledger
//! - `peers`: peer link set used to suppress duplicate deliveries
//! - `rooms`: transport room membership
//! - `connection`: handshake validation and per-connection record
//! - `relay`: the actor applying every connection event
//! - `network`: WebSocket endpoint and per-socket tasks
//! - `http`: routes and handlers
//! - `stats`: host resource sampling
//! - `config`: command line and environment configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(config.address()).await?;
//!
//!     // Runs until Ctrl+C
//!     server::serve(listener, config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod network;
pub mod peers;
pub mod registry;
pub mod relay;
pub mod respawn;
pub mod rooms;
pub mod stats;
pub mod utils;

use config::Config;
use http::AppState;
use log::{error, info};
use relay::Relay;
use std::future::Future;
use tokio::net::TcpListener;

/// Runs the relay and its HTTP surface on `listener` until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    config: Config,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cors = config.cors_layer()?;

    let (relay, handle) = Relay::new(config.sweep_interval());
    let relay_task = tokio::spawn(relay.run());

    let app = http::router(AppState::new(handle.clone())).layer(cors);

    info!("Live relay listening on {}", listener.local_addr()?);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    handle.shutdown();
    if let Err(e) = relay_task.await {
        error!("Relay task failed: {}", e);
    }

    info!("Live relay stopped");
    Ok(result?)
}
