use crate::handler::RelayHandler;
use crate::peer::{PeerAssist, PeerError, PeerEvent, PeerNetwork, RelayAction};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    Attribute, AttributeUpdate, ClientPacket, ConnectionId, Group, RespawnReport, RespawnTimer,
    ServerPacket, UNSET_PLACEHOLDER,
};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Only sender clients can publish")]
    NotSender,

    #[error("Client is closed")]
    Closed,

    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(e))
    }
}

/// Whether the client shares its own presence or only watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Viewer,
    Sender,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// WebSocket endpoint of the relay, e.g. `ws://localhost:3000/ws`
    pub server_url: String,
    pub token: String,
    pub role: Role,
    pub steam_id: Option<String>,
    pub steam_name: Option<String>,
    pub peer_to_peer: bool,
}

impl ClientOptions {
    pub fn viewer(server_url: &str, token: &str) -> Self {
        ClientOptions {
            server_url: server_url.to_string(),
            token: token.to_string(),
            role: Role::Viewer,
            steam_id: None,
            steam_name: None,
            peer_to_peer: true,
        }
    }

    pub fn sender(server_url: &str, token: &str, steam_id: &str, steam_name: &str) -> Self {
        ClientOptions {
            server_url: server_url.to_string(),
            token: token.to_string(),
            role: Role::Sender,
            steam_id: Some(steam_id.to_string()),
            steam_name: Some(steam_name.to_string()),
            peer_to_peer: true,
        }
    }

    pub fn with_peer_to_peer(mut self, enabled: bool) -> Self {
        self.peer_to_peer = enabled;
        self
    }

    /// Server URL with the handshake query parameters appended
    pub fn handshake_url(&self) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.server_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", &self.token);

            if self.role == Role::Sender {
                query.append_pair("isOverwolfApp", "true");
                query.append_pair(
                    "steamId",
                    self.steam_id.as_deref().unwrap_or(UNSET_PLACEHOLDER),
                );
                query.append_pair(
                    "steamName",
                    self.steam_name.as_deref().unwrap_or(UNSET_PLACEHOLDER),
                );
            }
        }
        Ok(url)
    }
}

/// Answer to a status request
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub group: Group,
    /// Room members without a participant entry
    pub connections: Vec<ConnectionId>,
}

#[derive(Debug)]
enum ClientCommand {
    Publish(Attribute),
    Hotkey(String),
    ReportRespawn(RespawnReport),
    Status(oneshot::Sender<StatusSnapshot>),
    RespawnTimers {
        world_name: String,
        reply: oneshot::Sender<Vec<RespawnTimer>>,
    },
    Close,
}

/// Cloneable handle to a running [`RelayClient`]
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    role: Role,
}

impl ClientHandle {
    fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// Publishes one attribute to the relay and every open peer channel
    pub fn publish(&self, attribute: Attribute) -> Result<(), ClientError> {
        if self.role != Role::Sender {
            return Err(ClientError::NotSender);
        }
        self.send(ClientCommand::Publish(attribute))
    }

    pub fn hotkey(&self, hotkey: &str) -> Result<(), ClientError> {
        self.send(ClientCommand::Hotkey(hotkey.to_string()))
    }

    pub fn report_respawn(&self, report: RespawnReport) -> Result<(), ClientError> {
        self.send(ClientCommand::ReportRespawn(report))
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(ClientCommand::Status(reply))?;
        response.await.map_err(|_| ClientError::Closed)
    }

    pub async fn respawn_timers(&self, world_name: &str) -> Result<Vec<RespawnTimer>, ClientError> {
        let (reply, response) = oneshot::channel();
        self.send(ClientCommand::RespawnTimers {
            world_name: world_name.to_string(),
            reply,
        })?;
        response.await.map_err(|_| ClientError::Closed)
    }

    pub fn close(&self) {
        let _ = self.send(ClientCommand::Close);
    }
}

/// Who is waiting for a status reply
enum StatusRequest {
    Refresh,
    Caller(oneshot::Sender<StatusSnapshot>),
}

/// Relay connection driving a [`RelayHandler`] and, optionally, the peer layer
pub struct RelayClient<H: RelayHandler, N: PeerNetwork> {
    options: ClientOptions,
    handler: H,
    peers: Option<PeerAssist<N>>,
    connection_id: Option<ConnectionId>,

    commands: mpsc::UnboundedReceiver<ClientCommand>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,

    next_request_id: u64,
    pending_status: HashMap<u64, StatusRequest>,
    pending_timers: HashMap<u64, oneshot::Sender<Vec<RespawnTimer>>>,
}

impl<H: RelayHandler, N: PeerNetwork> RelayClient<H, N> {
    /// Creates a client; nothing happens until [`RelayClient::run`]
    ///
    /// `network` is ignored when peer-to-peer is disabled in `options`.
    pub fn new(options: ClientOptions, handler: H, network: N) -> (Self, ClientHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let handle = ClientHandle {
            commands: command_tx,
            role: options.role,
        };
        let peers = options.peer_to_peer.then(|| PeerAssist::new(network));

        let client = RelayClient {
            options,
            handler,
            peers,
            connection_id: None,
            commands: command_rx,
            peer_tx,
            peer_rx,
            next_request_id: 0,
            pending_status: HashMap::new(),
            pending_timers: HashMap::new(),
        };

        (client, handle)
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Connects and processes events until the relay or the handle closes it
    pub async fn run(mut self) -> Result<H, ClientError> {
        let url = self.options.handshake_url()?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        info!("Connected to relay at {}", self.options.server_url);

        loop {
            let outgoing = tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerPacket>(text.as_str()) {
                            Ok(packet) => self.handle_packet(packet),
                            Err(e) => {
                                debug!("Dropping malformed frame: {}", e);
                                Vec::new()
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        self.finish();
                        return Err(e.into());
                    }
                },

                command = self.commands.recv() => match command {
                    Some(ClientCommand::Close) | None => {
                        info!("Closing relay connection");
                        let _ = ws_sender.close().await;
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },

                Some(event) = self.peer_rx.recv() => self.handle_peer_event(event),
            };

            for packet in outgoing {
                let text = serde_json::to_string(&packet)?;
                ws_sender.send(Message::Text(text.into())).await?;
            }
        }

        self.finish();
        Ok(self.handler)
    }

    fn finish(&mut self) {
        if let Some(peers) = self.peers.as_mut() {
            peers.shutdown();
        }
        self.handler.on_close();
    }

    fn handle_packet(&mut self, packet: ServerPacket) -> Vec<ClientPacket> {
        let mut outgoing = Vec::new();

        match packet {
            ServerPacket::Welcome { connection_id } => {
                info!("Relay assigned connection id {}", connection_id);
                self.handler.on_connect(&connection_id);

                if let Some(peers) = self.peers.as_mut() {
                    if let Err(e) = peers.start(&connection_id, self.peer_tx.clone()) {
                        warn!("Peer-to-peer unavailable, relay only: {}", e);
                        self.peers = None;
                    }
                }
                self.connection_id = Some(connection_id);
                outgoing.push(self.refresh_status());
            }

            ServerPacket::Status(group) => self.handler.on_group(&group),

            ServerPacket::StatusReply {
                request_id,
                group,
                connections,
            } => match self.pending_status.remove(&request_id) {
                Some(StatusRequest::Caller(reply)) => {
                    let _ = reply.send(StatusSnapshot { group, connections });
                }
                Some(StatusRequest::Refresh) => {
                    self.handler.on_group(&group);
                    if self.options.role == Role::Sender {
                        if let Some(peers) = self.peers.as_mut() {
                            peers.share_group(&group, &connections);
                        }
                    }
                }
                None => debug!("Unexpected status reply {}", request_id),
            },

            ServerPacket::Connected(presence) => {
                self.handler.on_connected(&presence);
                if self.options.role == Role::Sender {
                    outgoing.push(self.refresh_status());
                }
            }

            ServerPacket::Disconnected(presence) => {
                self.handler.on_disconnected(&presence);
                if self.options.role == Role::Sender {
                    if let Some(peers) = self.peers.as_mut() {
                        peers.drop_connection(&presence.connection_id);
                    }
                    outgoing.push(self.refresh_status());
                }
            }

            ServerPacket::Data(update) => {
                if self.accepts_relayed(&update) {
                    self.handler.on_player(&update);
                }
            }

            ServerPacket::Hotkey { steam_id, hotkey } => {
                self.handler.on_hotkey(steam_id.as_deref(), &hotkey)
            }

            ServerPacket::MarkerRespawnAt(notice) => self.handler.on_respawn(&notice),

            ServerPacket::RespawnTimers { request_id, timers } => {
                match self.pending_timers.remove(&request_id) {
                    Some(reply) => {
                        let _ = reply.send(timers);
                    }
                    None => debug!("Unexpected respawn timers reply {}", request_id),
                }
            }
        }

        outgoing
    }

    /// Relayed deltas need an identity and must not duplicate a peer channel
    fn accepts_relayed(&self, update: &AttributeUpdate) -> bool {
        let Some(steam_id) = update.steam_id.as_deref() else {
            return false;
        };
        !self
            .peers
            .as_ref()
            .is_some_and(|peers| peers.is_suppressed(steam_id))
    }

    fn handle_command(&mut self, command: ClientCommand) -> Vec<ClientPacket> {
        match command {
            ClientCommand::Publish(attribute) => {
                if let Some(peers) = self.peers.as_mut() {
                    let update =
                        AttributeUpdate::new(self.options.steam_id.clone(), attribute.clone());
                    peers.broadcast(&update);
                }
                vec![ClientPacket::publish(attribute)]
            }
            ClientCommand::Hotkey(hotkey) => vec![ClientPacket::Hotkey(hotkey)],
            ClientCommand::ReportRespawn(report) => vec![ClientPacket::MarkerRespawnAt(report)],
            ClientCommand::Status(reply) => {
                let request_id = self.next_request_id();
                self.pending_status
                    .insert(request_id, StatusRequest::Caller(reply));
                vec![ClientPacket::Status { request_id }]
            }
            ClientCommand::RespawnTimers { world_name, reply } => {
                let request_id = self.next_request_id();
                self.pending_timers.insert(request_id, reply);
                vec![ClientPacket::MarkersRespawnTimers {
                    request_id,
                    world_name,
                }]
            }
            // Handled by the run loop
            ClientCommand::Close => Vec::new(),
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) -> Vec<ClientPacket> {
        let Some(peers) = self.peers.as_mut() else {
            return Vec::new();
        };

        let actions = peers.handle_event(event, &mut self.handler);
        actions
            .into_iter()
            .map(|action| match action {
                RelayAction::Send(packet) => packet,
                RelayAction::RefreshStatus => self.refresh_status(),
            })
            .collect()
    }

    fn refresh_status(&mut self) -> ClientPacket {
        let request_id = self.next_request_id();
        self.pending_status.insert(request_id, StatusRequest::Refresh);
        ClientPacket::Status { request_id }
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }
}
