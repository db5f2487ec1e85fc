//! Relay actor: owns every piece of live state and applies connection events
//! one at a time

use crate::connection::{Connection, JoinRequest};
use crate::error::RelayError;
use crate::peers::PeerLinks;
use crate::registry::{GroupRegistry, PlayerFilter, PublicPlayer};
use crate::respawn::{MarkerRespawn, RespawnLedger, WorldRespawn};
use crate::rooms::Rooms;
use crate::utils::{generate_connection_id, get_timestamp};
use log::{debug, info, warn};
use shared::{
    Attribute, AttributeUpdate, ClientPacket, ConnectionId, Group, Presence, RespawnNotice,
    RespawnReport, ServerPacket,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

/// Requests sent from connection tasks and HTTP handlers to the relay
#[derive(Debug)]
pub enum RelayCommand {
    Connect {
        request: JoinRequest,
        sender: mpsc::Sender<ServerPacket>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Packet {
        connection_id: ConnectionId,
        packet: ClientPacket,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Group {
        token: String,
        reply: oneshot::Sender<Option<Group>>,
    },
    PublicPlayers {
        filter: PlayerFilter,
        reply: oneshot::Sender<Vec<PublicPlayer>>,
    },
    AllRespawns {
        reply: oneshot::Sender<Vec<WorldRespawn>>,
    },
    WorldRespawns {
        world_name: String,
        reply: oneshot::Sender<Vec<MarkerRespawn>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayStats {
    pub groups: usize,
    pub connections: usize,
}

/// Cloneable front door to a running [`Relay`]
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::Unavailable)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RelayCommand,
    ) -> Result<T, RelayError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| RelayError::Unavailable)
    }

    /// Registers a new connection and returns its id
    pub async fn connect(
        &self,
        request: JoinRequest,
        sender: mpsc::Sender<ServerPacket>,
    ) -> Result<ConnectionId, RelayError> {
        self.request(|reply| RelayCommand::Connect {
            request,
            sender,
            reply,
        })
        .await
    }

    pub fn packet(&self, connection_id: &str, packet: ClientPacket) {
        let command = RelayCommand::Packet {
            connection_id: connection_id.to_string(),
            packet,
        };
        if self.send(command).is_err() {
            debug!("Relay gone, dropping packet from {}", connection_id);
        }
    }

    pub fn disconnect(&self, connection_id: &str) {
        let command = RelayCommand::Disconnect {
            connection_id: connection_id.to_string(),
        };
        if self.send(command).is_err() {
            debug!("Relay gone, dropping disconnect of {}", connection_id);
        }
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        self.request(|reply| RelayCommand::Stats { reply }).await
    }

    pub async fn group(&self, token: &str) -> Result<Option<Group>, RelayError> {
        let token = token.to_string();
        self.request(|reply| RelayCommand::Group { token, reply })
            .await
    }

    pub async fn public_players(
        &self,
        filter: PlayerFilter,
    ) -> Result<Vec<PublicPlayer>, RelayError> {
        self.request(|reply| RelayCommand::PublicPlayers { filter, reply })
            .await
    }

    pub async fn all_respawns(&self) -> Result<Vec<WorldRespawn>, RelayError> {
        self.request(|reply| RelayCommand::AllRespawns { reply })
            .await
    }

    pub async fn world_respawns(&self, world_name: &str) -> Result<Vec<MarkerRespawn>, RelayError> {
        let world_name = world_name.to_string();
        self.request(|reply| RelayCommand::WorldRespawns { world_name, reply })
            .await
    }

    pub fn shutdown(&self) {
        let _ = self.send(RelayCommand::Shutdown);
    }
}

/// Single owner of the group registry, respawn ledger, peer links and rooms
///
/// Every mutation happens inside [`Relay::run`], one command at a time, so
/// none of the state needs a lock. The respawn sweep is a branch of the same
/// loop and never interleaves with a command.
pub struct Relay {
    registry: GroupRegistry,
    ledger: RespawnLedger,
    peer_links: PeerLinks,
    rooms: Rooms,
    connections: HashMap<ConnectionId, Connection>,
    sweep_interval: Duration,
    commands: mpsc::UnboundedReceiver<RelayCommand>,
}

impl Relay {
    pub fn new(sweep_interval: Duration) -> (Self, RelayHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let relay = Relay {
            registry: GroupRegistry::new(),
            ledger: RespawnLedger::new(),
            peer_links: PeerLinks::new(),
            rooms: Rooms::new(),
            connections: HashMap::new(),
            sweep_interval,
            commands: rx,
        };

        (relay, RelayHandle { commands: tx })
    }

    /// Main relay loop
    pub async fn run(mut self) {
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick since it fires immediately
        sweep.tick().await;

        info!("Relay started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(RelayCommand::Shutdown) | None => {
                            info!("Relay shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                },

                _ = sweep.tick() => {
                    let removed = self.sweep(now());
                    if removed > 0 {
                        debug!("Swept {} expired respawn entries", removed);
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Connect {
                request,
                sender,
                reply,
            } => {
                let connection_id = self.connect(request, sender);
                if reply.send(connection_id.clone()).is_err() {
                    // The socket task died while waiting for its id
                    self.disconnect(&connection_id);
                }
            }
            RelayCommand::Packet {
                connection_id,
                packet,
            } => self.handle_packet(&connection_id, packet, now()),
            RelayCommand::Disconnect { connection_id } => self.disconnect(&connection_id),
            RelayCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            RelayCommand::Group { token, reply } => {
                let _ = reply.send(self.registry.group(&token).cloned());
            }
            RelayCommand::PublicPlayers { filter, reply } => {
                let _ = reply.send(self.registry.public_players(&filter));
            }
            RelayCommand::AllRespawns { reply } => {
                let _ = reply.send(self.ledger.all_timers(now()));
            }
            RelayCommand::WorldRespawns { world_name, reply } => {
                let _ = reply.send(self.ledger.world_timers(&world_name, now()));
            }
            RelayCommand::Shutdown => {}
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            groups: self.registry.group_count(),
            connections: self.connections.len(),
        }
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    /// Accepts a validated connection under a fresh id
    pub fn connect(
        &mut self,
        request: JoinRequest,
        sender: mpsc::Sender<ServerPacket>,
    ) -> ConnectionId {
        let mut connection_id = generate_connection_id();
        while self.connections.contains_key(&connection_id) {
            connection_id = generate_connection_id();
        }

        self.accept(connection_id.clone(), request, sender);
        connection_id
    }

    /// Joins a connection to its room under the given id
    ///
    /// The new connection is greeted with its id. Others in the room learn
    /// about it through `connected`, preceded by a fresh `status` when it
    /// created a participant entry.
    pub fn accept(
        &mut self,
        connection_id: ConnectionId,
        request: JoinRequest,
        sender: mpsc::Sender<ServerPacket>,
    ) {
        let connection = Connection::new(connection_id.clone(), request, sender);
        let token = connection.token.clone();

        self.rooms.join(&token, &connection_id);
        let created = self.registry.join(
            &token,
            &connection_id,
            connection.is_authoritative,
            connection.steam_id.clone(),
            connection.steam_name.clone(),
        );

        info!(
            "Connection {} joined group {} (authoritative: {})",
            connection_id, token, connection.is_authoritative
        );

        connection.send(ServerPacket::Welcome {
            connection_id: connection_id.clone(),
        });
        let presence = presence_of(&connection);
        self.connections.insert(connection_id.clone(), connection);

        if created {
            let status = ServerPacket::Status(self.registry.snapshot(&token));
            self.broadcast(&token, &connection_id, status);
        }
        self.broadcast(&token, &connection_id, ServerPacket::Connected(presence));
    }

    /// Applies one inbound event of a connection
    ///
    /// Unknown connections and events they are not allowed to send are
    /// dropped without telling the sender.
    pub fn handle_packet(&mut self, connection_id: &str, packet: ClientPacket, now: i64) {
        if !self.connections.contains_key(connection_id) {
            debug!("Dropping packet from unknown connection {}", connection_id);
            return;
        }

        let packet = match packet.into_attribute() {
            Ok(attribute) => {
                self.publish(connection_id, attribute);
                return;
            }
            Err(packet) => packet,
        };

        match packet {
            ClientPacket::Status { request_id } => self.reply_status(connection_id, request_id),
            ClientPacket::Hotkey(hotkey) => self.relay_hotkey(connection_id, hotkey),
            ClientPacket::MarkerRespawnAt(report) => {
                self.record_respawn(connection_id, report, now)
            }
            ClientPacket::MarkersRespawnTimers {
                request_id,
                world_name,
            } => self.reply_respawn_timers(connection_id, request_id, &world_name, now),
            ClientPacket::PeerOn(steam_id) => {
                debug!("Connection {} peered with {}", connection_id, steam_id);
                self.peer_links.link(&steam_id, connection_id);
            }
            ClientPacket::PeerOff(steam_id) => {
                debug!("Connection {} unpeered from {}", connection_id, steam_id);
                self.peer_links.unlink(&steam_id, connection_id);
            }
            // Attribute publishes were handled above
            _ => {}
        }
    }

    fn publish(&mut self, connection_id: &str, attribute: Attribute) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };
        if !connection.is_authoritative {
            debug!(
                "Dropping {} from passive connection {}",
                attribute.name(),
                connection_id
            );
            return;
        }
        let token = connection.token.clone();

        let Some(participant) = self
            .registry
            .publish(&token, connection_id, attribute.clone())
        else {
            debug!("Dropping {} from unregistered {}", attribute.name(), connection_id);
            return;
        };
        let steam_id = participant.steam_id.clone();

        let packet = ServerPacket::Data(AttributeUpdate::new(steam_id.clone(), attribute));
        for member in self.rooms.members(&token) {
            if member == connection_id {
                continue;
            }
            if let Some(steam_id) = &steam_id {
                if self.peer_links.is_linked(steam_id, member) {
                    continue;
                }
            }
            self.send_to(member, packet.clone());
        }
    }

    fn reply_status(&self, connection_id: &str, request_id: u64) {
        let Some(token) = self.token_of(connection_id) else {
            return;
        };

        let group = self.registry.snapshot(token);
        let connections = self
            .rooms
            .members(token)
            .filter(|member| !group.contains_key(*member))
            .cloned()
            .collect();

        self.send_to(
            connection_id,
            ServerPacket::StatusReply {
                request_id,
                group,
                connections,
            },
        );
    }

    fn relay_hotkey(&self, connection_id: &str, hotkey: String) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };

        let packet = ServerPacket::Hotkey {
            steam_id: connection.steam_id.clone(),
            hotkey,
        };
        self.broadcast(&connection.token, connection_id, packet);
    }

    fn record_respawn(&mut self, connection_id: &str, report: RespawnReport, now: i64) {
        let Some(connection) = self.connections.get(connection_id) else {
            return;
        };
        let token = connection.token.clone();
        let steam_id = report.steam_id.clone().or_else(|| connection.steam_id.clone());

        let notice = RespawnNotice {
            marker_id: report.marker_id.clone(),
            respawn_timer: report.respawn_timer,
            steam_id: steam_id.clone(),
            marker_type: report.marker_type.clone(),
        };

        let entry = self.ledger.record(&token, report, steam_id, now);
        debug!(
            "Marker {} in {} respawns at {}",
            entry.marker_id, entry.world_name, entry.respawn_at
        );

        self.broadcast(&token, connection_id, ServerPacket::MarkerRespawnAt(notice));
    }

    fn reply_respawn_timers(
        &self,
        connection_id: &str,
        request_id: u64,
        world_name: &str,
        now: i64,
    ) {
        let Some(token) = self.token_of(connection_id) else {
            return;
        };

        let timers = self.ledger.timers_for(world_name, token, now);
        self.send_to(connection_id, ServerPacket::RespawnTimers { request_id, timers });
    }

    /// Tears down a connection and tells the rest of its room
    pub fn disconnect(&mut self, connection_id: &str) {
        let Some(connection) = self.connections.remove(connection_id) else {
            return;
        };
        let token = connection.token.clone();

        self.peer_links.drop_connection(connection_id);

        if connection.is_authoritative {
            self.registry.leave(&token, connection_id);
        }

        info!(
            "Connection {} left group {} after {:?}",
            connection_id,
            token,
            connection.connected_at.elapsed()
        );

        self.broadcast(
            &token,
            connection_id,
            ServerPacket::Disconnected(presence_of(&connection)),
        );
        if connection.is_authoritative {
            let status = ServerPacket::Status(self.registry.snapshot(&token));
            self.broadcast(&token, connection_id, status);
        }

        if self.rooms.leave(&token, connection_id) {
            debug!("Room {} deleted", token);
            self.registry.room_deleted(&token);
        }
    }

    /// Drops expired respawn entries
    pub fn sweep(&mut self, now: i64) -> usize {
        self.ledger.sweep(now)
    }

    fn token_of(&self, connection_id: &str) -> Option<&str> {
        self.connections
            .get(connection_id)
            .map(|connection| connection.token.as_str())
    }

    fn send_to(&self, connection_id: &str, packet: ServerPacket) {
        if let Some(connection) = self.connections.get(connection_id) {
            if !connection.send(packet) {
                warn!("Connection {} has no writer, packet dropped", connection_id);
            }
        }
    }

    /// Sends a packet to everyone in the room except `sender`
    fn broadcast(&self, token: &str, sender: &str, packet: ServerPacket) {
        for member in self.rooms.members(token) {
            if member != sender {
                self.send_to(member, packet.clone());
            }
        }
    }
}

fn presence_of(connection: &Connection) -> Presence {
    Presence {
        is_authoritative: connection.is_authoritative,
        display_name: connection.steam_name.clone(),
        connection_id: connection.id.clone(),
    }
}

fn now() -> i64 {
    get_timestamp() as i64
}
