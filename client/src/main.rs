use clap::Parser;
use client::handler::RelayHandler;
use client::network::{ClientHandle, ClientOptions, RelayClient};
use client::peer::NoPeerNetwork;
use log::info;
use shared::{Attribute, AttributeUpdate, Group, Position, Presence, RespawnNotice};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay WebSocket endpoint
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Group token to join
    #[arg(short = 't', long)]
    token: String,

    /// Share a simulated position instead of watching
    #[arg(long)]
    sender: bool,

    /// Steam id announced when sharing
    #[arg(long, default_value = "76561190000000000")]
    steam_id: String,

    /// Display name announced when sharing
    #[arg(long, default_value = "live-client")]
    steam_name: String,

    /// Milliseconds between simulated position updates
    #[arg(short = 'i', long, default_value = "500")]
    interval_ms: u64,
}

/// Logs every event the relay delivers
struct LogHandler;

impl RelayHandler for LogHandler {
    fn on_connect(&mut self, connection_id: &str) {
        info!("Connected as {}", connection_id);
    }

    fn on_group(&mut self, group: &Group) {
        info!("Group has {} participant(s)", group.len());
        for (connection_id, participant) in group {
            info!(
                "  {} steamId={:?} username={:?} position={:?}",
                connection_id, participant.steam_id, participant.username, participant.position
            );
        }
    }

    fn on_player(&mut self, update: &AttributeUpdate) {
        info!(
            "{:?} {} -> {:?}",
            update.steam_id,
            update.attribute.name(),
            update.attribute
        );
    }

    fn on_hotkey(&mut self, steam_id: Option<&str>, hotkey: &str) {
        info!("Hotkey {} from {:?}", hotkey, steam_id);
    }

    fn on_connected(&mut self, presence: &Presence) {
        info!("{} joined ({:?})", presence.connection_id, presence.display_name);
    }

    fn on_disconnected(&mut self, presence: &Presence) {
        info!("{} left ({:?})", presence.connection_id, presence.display_name);
    }

    fn on_respawn(&mut self, notice: &RespawnNotice) {
        info!(
            "Marker {} ({}) respawns in {}ms",
            notice.marker_id, notice.marker_type, notice.respawn_timer
        );
    }

    fn on_close(&mut self) {
        info!("Relay connection closed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let options = if args.sender {
        ClientOptions::sender(&args.server, &args.token, &args.steam_id, &args.steam_name)
    } else {
        ClientOptions::viewer(&args.server, &args.token)
    }
    .with_peer_to_peer(false);

    info!("Starting client...");
    info!("Connecting to: {} (group {})", args.server, args.token);

    let (client, handle) = RelayClient::new(options, LogHandler, NoPeerNetwork);
    let mut task = tokio::spawn(client.run());

    let period = Duration::from_millis(args.interval_ms.max(1));
    let sharing = async {
        if args.sender {
            share_circle(&handle, period).await
        } else {
            std::future::pending().await
        }
    };

    let shared = tokio::select! {
        result = sharing => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, disconnecting...");
            Ok(())
        }
        // The client stopped on its own, e.g. a rejected handshake
        result = &mut task => {
            result??;
            return Ok(());
        }
    };

    handle.close();
    // Client errors take precedence over the publish error they cause
    task.await??;

    shared
}

/// Walks a circle around a fixed point until the client closes
async fn share_circle(
    handle: &ClientHandle,
    period: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    handle.publish(Attribute::WorldName("Aeternum".to_string()))?;
    handle.publish(Attribute::Map("newworld_vitaeeterna".to_string()))?;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut angle: f64 = 0.0;
    loop {
        ticker.tick().await;

        let position = Position {
            location: [8000.0 + 50.0 * angle.cos(), 8000.0 + 50.0 * angle.sin()],
            rotation: angle.to_degrees() % 360.0,
        };
        handle.publish(Attribute::Position(position))?;
        angle += 0.1;
    }
}
