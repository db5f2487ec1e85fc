//! Peer-assist protocol: direct client-to-client channels next to the relay
//!
//! Senders open a channel to every passive viewer of their group and push
//! attribute deltas over it. A viewer that receives a delta for a `steamId`
//! over a channel tells the relay (`peer:on`) and from then on ignores relayed
//! `data` for that identity, until the channel closes (`peer:off`).
//!
//! The brokering service that actually connects peers is abstracted behind
//! [`PeerNetwork`]. Losing a channel is never fatal: the relay keeps
//! delivering everything the channel would have carried.

use crate::handler::RelayHandler;
use log::{debug, info, warn};
use shared::{peer_id, AttributeUpdate, ClientPacket, ConnectionId, Group, PeerPacket};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifier of one peer channel, unique within a [`PeerNetwork`]
pub type ChannelId = u64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("Peer broker unavailable: {0}")]
    Broker(String),

    #[error("Peer channel {0} failed: {1}")]
    Channel(ChannelId, String),

    #[error("Peer-to-peer is not available")]
    Unsupported,
}

/// Notifications from the peer network
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Registered with the broker under the given peer id
    Open(String),
    /// A channel is ready; `inbound` is true when the remote side opened it
    ChannelOpened { channel: ChannelId, inbound: bool },
    Data { channel: ChannelId, packet: PeerPacket },
    ChannelClosed(ChannelId),
    Error(PeerError),
    /// The broker connection was lost; channels may still be open
    Disconnected,
}

/// Peer connection brokering service
///
/// Implementations report progress asynchronously through the event sender
/// handed to [`PeerNetwork::listen`].
pub trait PeerNetwork: Send + 'static {
    /// Registers this client under `peer_id`
    fn listen(
        &mut self,
        peer_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PeerError>;

    /// Starts opening a channel to the peer registered as `peer_id`
    fn connect(&mut self, peer_id: &str) -> Result<ChannelId, PeerError>;

    fn send(&mut self, channel: ChannelId, packet: &PeerPacket) -> Result<(), PeerError>;

    fn close(&mut self, channel: ChannelId);

    /// Restores the broker registration after [`PeerEvent::Disconnected`]
    fn reconnect(&mut self) -> Result<(), PeerError>;

    /// Drops the registration and every channel
    fn destroy(&mut self);
}

/// Stand-in network for clients running in pure relay mode
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeerNetwork;

impl PeerNetwork for NoPeerNetwork {
    fn listen(&mut self, _: &str, _: mpsc::UnboundedSender<PeerEvent>) -> Result<(), PeerError> {
        Err(PeerError::Unsupported)
    }

    fn connect(&mut self, _: &str) -> Result<ChannelId, PeerError> {
        Err(PeerError::Unsupported)
    }

    fn send(&mut self, _: ChannelId, _: &PeerPacket) -> Result<(), PeerError> {
        Err(PeerError::Unsupported)
    }

    fn close(&mut self, _: ChannelId) {}

    fn reconnect(&mut self) -> Result<(), PeerError> {
        Err(PeerError::Unsupported)
    }

    fn destroy(&mut self) {}
}

/// What the peer layer needs from the relay connection
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    Send(ClientPacket),
    RefreshStatus,
}

pub struct PeerAssist<N: PeerNetwork> {
    network: N,
    registered: bool,
    listening: bool,

    // Viewer side: steam id -> inbound channels delivering it
    suppressed: HashMap<String, HashSet<ChannelId>>,
    inbound: HashMap<ChannelId, Option<String>>,

    // Sender side
    outgoing: HashMap<ConnectionId, ChannelId>,
    open_outgoing: HashSet<ChannelId>,
    waiting: BTreeSet<ConnectionId>,
    last_group: Option<Group>,
}

impl<N: PeerNetwork> PeerAssist<N> {
    pub fn new(network: N) -> Self {
        PeerAssist {
            network,
            registered: false,
            listening: false,
            suppressed: HashMap::new(),
            inbound: HashMap::new(),
            outgoing: HashMap::new(),
            open_outgoing: HashSet::new(),
            waiting: BTreeSet::new(),
            last_group: None,
        }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Registers under the peer address derived from `connection_id`
    ///
    /// Any previous registration is torn down first, since a new relay
    /// connection means a new address.
    pub fn start(
        &mut self,
        connection_id: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<(), PeerError> {
        if self.listening {
            self.shutdown();
        }

        let address = peer_id(connection_id);
        self.network.listen(&address, events)?;
        self.listening = true;
        debug!("Listening for peers as {}", address);
        Ok(())
    }

    /// True while relayed `data` for `steam_id` must be ignored
    pub fn is_suppressed(&self, steam_id: &str) -> bool {
        self.suppressed.contains_key(steam_id)
    }

    pub fn open_channels(&self) -> usize {
        self.open_outgoing.len() + self.inbound.len()
    }

    pub fn handle_event(
        &mut self,
        event: PeerEvent,
        handler: &mut dyn RelayHandler,
    ) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        match event {
            PeerEvent::Open(id) => {
                info!("Peer id is {}", id);
                self.registered = true;
                let waiting = std::mem::take(&mut self.waiting);
                for connection_id in waiting {
                    self.open_channel(connection_id);
                }
            }

            PeerEvent::ChannelOpened {
                channel,
                inbound: true,
            } => {
                debug!("Peer channel {} opened by remote", channel);
                self.inbound.insert(channel, None);
                actions.push(RelayAction::RefreshStatus);
            }

            PeerEvent::ChannelOpened {
                channel,
                inbound: false,
            } => {
                debug!("Peer channel {} opened", channel);
                self.open_outgoing.insert(channel);
                if let Some(group) = self.last_group.clone() {
                    self.send(channel, &PeerPacket::Group { group });
                }
            }

            PeerEvent::Data { channel, packet } => match packet {
                PeerPacket::Group { group } => handler.on_group(&group),
                PeerPacket::Data(update) => {
                    let Some(steam_id) = update.steam_id.clone() else {
                        return actions;
                    };
                    let previous = self.inbound.insert(channel, Some(steam_id.clone()));
                    if let Some(Some(previous)) = previous {
                        if previous != steam_id {
                            actions.extend(self.release(channel, previous));
                        }
                    }

                    let channels = self.suppressed.entry(steam_id.clone()).or_default();
                    let first = channels.is_empty();
                    channels.insert(channel);
                    if first {
                        actions.push(RelayAction::Send(ClientPacket::PeerOn(steam_id)));
                    }
                    handler.on_player(&update);
                }
            },

            PeerEvent::ChannelClosed(channel) => {
                debug!("Peer channel {} closed", channel);
                if let Some(Some(steam_id)) = self.inbound.remove(&channel) {
                    actions.extend(self.release(channel, steam_id));
                }
                self.open_outgoing.remove(&channel);
                self.outgoing.retain(|_, open| *open != channel);
            }

            PeerEvent::Error(e) => {
                // A failed channel lapses back to relay delivery
                warn!("Peer error: {}", e);
            }

            PeerEvent::Disconnected => {
                warn!("Peer broker disconnected, reconnecting");
                self.registered = false;
                if let Err(e) = self.network.reconnect() {
                    warn!("Peer reconnect failed: {}", e);
                }
            }
        }

        actions
    }

    /// Pushes the latest group to open channels and opens channels to new viewers
    pub fn share_group(&mut self, group: &Group, passive: &[ConnectionId]) {
        self.last_group = Some(group.clone());

        let packet = PeerPacket::Group {
            group: group.clone(),
        };
        self.send_to_open(&packet);

        for connection_id in passive {
            if self.outgoing.contains_key(connection_id) {
                continue;
            }
            if self.registered {
                self.open_channel(connection_id.clone());
            } else {
                self.waiting.insert(connection_id.clone());
            }
        }
    }

    /// Sends an attribute delta over every open outgoing channel
    pub fn broadcast(&mut self, update: &AttributeUpdate) {
        self.send_to_open(&PeerPacket::Data(update.clone()));
    }

    /// Closes the channel to a connection that left the relay
    pub fn drop_connection(&mut self, connection_id: &str) {
        self.waiting.remove(connection_id);
        if let Some(channel) = self.outgoing.remove(connection_id) {
            self.open_outgoing.remove(&channel);
            self.network.close(channel);
        }
    }

    /// Closes every channel and the broker registration
    pub fn shutdown(&mut self) {
        for (_, channel) in self.outgoing.drain() {
            self.network.close(channel);
        }
        for (channel, _) in self.inbound.drain() {
            self.network.close(channel);
        }
        self.open_outgoing.clear();
        self.waiting.clear();
        self.suppressed.clear();
        self.network.destroy();
        self.registered = false;
        self.listening = false;
    }

    /// Forgets `channel` as a source of `steam_id`; the last one lifts suppression
    fn release(&mut self, channel: ChannelId, steam_id: String) -> Option<RelayAction> {
        let channels = self.suppressed.get_mut(&steam_id)?;
        channels.remove(&channel);
        if !channels.is_empty() {
            return None;
        }

        self.suppressed.remove(&steam_id);
        Some(RelayAction::Send(ClientPacket::PeerOff(steam_id)))
    }

    fn open_channel(&mut self, connection_id: ConnectionId) {
        let address = peer_id(&connection_id);
        match self.network.connect(&address) {
            Ok(channel) => {
                debug!("Connecting to peer {} on channel {}", address, channel);
                self.outgoing.insert(connection_id, channel);
            }
            Err(e) => warn!("Failed to connect to peer {}: {}", address, e),
        }
    }

    fn send_to_open(&mut self, packet: &PeerPacket) {
        let channels: Vec<ChannelId> = self.open_outgoing.iter().copied().collect();
        for channel in channels {
            self.send(channel, packet);
        }
    }

    fn send(&mut self, channel: ChannelId, packet: &PeerPacket) {
        if let Err(e) = self.network.send(channel, packet) {
            debug!("Peer send on channel {} failed: {}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Attribute, Participant, Position};

    #[derive(Default)]
    struct FakeNetwork {
        listening_as: Option<String>,
        connects: Vec<String>,
        sent: Vec<(ChannelId, PeerPacket)>,
        closed: Vec<ChannelId>,
        reconnects: usize,
        destroyed: usize,
        next_channel: ChannelId,
    }

    impl PeerNetwork for FakeNetwork {
        fn listen(
            &mut self,
            peer_id: &str,
            _events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<(), PeerError> {
            self.listening_as = Some(peer_id.to_string());
            Ok(())
        }

        fn connect(&mut self, peer_id: &str) -> Result<ChannelId, PeerError> {
            self.connects.push(peer_id.to_string());
            self.next_channel += 1;
            Ok(self.next_channel)
        }

        fn send(&mut self, channel: ChannelId, packet: &PeerPacket) -> Result<(), PeerError> {
            self.sent.push((channel, packet.clone()));
            Ok(())
        }

        fn close(&mut self, channel: ChannelId) {
            self.closed.push(channel);
        }

        fn reconnect(&mut self) -> Result<(), PeerError> {
            self.reconnects += 1;
            Ok(())
        }

        fn destroy(&mut self) {
            self.destroyed += 1;
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        groups: Vec<Group>,
        players: Vec<AttributeUpdate>,
    }

    impl RelayHandler for RecordingHandler {
        fn on_group(&mut self, group: &Group) {
            self.groups.push(group.clone());
        }

        fn on_player(&mut self, update: &AttributeUpdate) {
            self.players.push(update.clone());
        }
    }

    fn assist() -> PeerAssist<FakeNetwork> {
        PeerAssist::new(FakeNetwork::default())
    }

    fn position_update(steam_id: &str) -> AttributeUpdate {
        AttributeUpdate::new(
            Some(steam_id.to_string()),
            Attribute::Position(Position {
                location: [1.0, 2.0],
                rotation: 0.0,
            }),
        )
    }

    fn group() -> Group {
        let mut group = Group::new();
        group.insert(
            "sender".to_string(),
            Participant::new(Some("s1".to_string()), None),
        );
        group
    }

    #[test]
    fn test_start_listens_on_sanitized_address() {
        let mut assist = assist();
        let (tx, _rx) = mpsc::unbounded_channel();

        assist.start("ab-1_CD", tx.clone()).unwrap();
        assert_eq!(assist.network().listening_as.as_deref(), Some("abCD"));

        // Restarting tears the old registration down first
        assist.start("xy", tx).unwrap();
        assert_eq!(assist.network().destroyed, 1);
        assert_eq!(assist.network().listening_as.as_deref(), Some("xy"));
    }

    #[test]
    fn test_inbound_channel_requests_status() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();

        let actions = assist.handle_event(
            PeerEvent::ChannelOpened {
                channel: 7,
                inbound: true,
            },
            &mut handler,
        );

        assert_eq!(actions, vec![RelayAction::RefreshStatus]);
    }

    #[test]
    fn test_peer_delta_suppresses_identity_until_close() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();
        assist.handle_event(
            PeerEvent::ChannelOpened {
                channel: 7,
                inbound: true,
            },
            &mut handler,
        );

        let data = |update| PeerEvent::Data {
            channel: 7,
            packet: PeerPacket::Data(update),
        };

        let actions = assist.handle_event(data(position_update("s1")), &mut handler);
        assert_eq!(
            actions,
            vec![RelayAction::Send(ClientPacket::PeerOn("s1".to_string()))]
        );
        assert!(assist.is_suppressed("s1"));
        assert_eq!(handler.players.len(), 1);

        // Only the first delta announces the link
        let actions = assist.handle_event(data(position_update("s1")), &mut handler);
        assert!(actions.is_empty());
        assert_eq!(handler.players.len(), 2);

        let actions = assist.handle_event(PeerEvent::ChannelClosed(7), &mut handler);
        assert_eq!(
            actions,
            vec![RelayAction::Send(ClientPacket::PeerOff("s1".to_string()))]
        );
        assert!(!assist.is_suppressed("s1"));
    }

    #[test]
    fn test_identity_stays_suppressed_while_any_channel_carries_it() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();
        let data = |channel| PeerEvent::Data {
            channel,
            packet: PeerPacket::Data(position_update("s1")),
        };

        let actions = assist.handle_event(data(7), &mut handler);
        assert_eq!(
            actions,
            vec![RelayAction::Send(ClientPacket::PeerOn("s1".to_string()))]
        );
        let actions = assist.handle_event(data(8), &mut handler);
        assert!(actions.is_empty());

        let actions = assist.handle_event(PeerEvent::ChannelClosed(7), &mut handler);
        assert!(actions.is_empty());
        assert!(assist.is_suppressed("s1"));

        let actions = assist.handle_event(PeerEvent::ChannelClosed(8), &mut handler);
        assert_eq!(
            actions,
            vec![RelayAction::Send(ClientPacket::PeerOff("s1".to_string()))]
        );
        assert!(!assist.is_suppressed("s1"));
    }

    #[test]
    fn test_peer_group_push_reaches_handler() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();

        assist.handle_event(
            PeerEvent::Data {
                channel: 3,
                packet: PeerPacket::Group { group: group() },
            },
            &mut handler,
        );

        assert_eq!(handler.groups, vec![group()]);
        assert!(!assist.is_suppressed("s1"));
    }

    #[test]
    fn test_delta_without_identity_is_ignored() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();

        let update = AttributeUpdate::new(None, Attribute::Map("newworld".to_string()));
        let actions = assist.handle_event(
            PeerEvent::Data {
                channel: 1,
                packet: PeerPacket::Data(update),
            },
            &mut handler,
        );

        assert!(actions.is_empty());
        assert!(handler.players.is_empty());
    }

    #[test]
    fn test_sender_waits_for_registration_before_connecting() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();

        assist.share_group(&group(), &["view-er".to_string()]);
        assert!(assist.network().connects.is_empty());

        assist.handle_event(PeerEvent::Open("sender".to_string()), &mut handler);
        assert_eq!(assist.network().connects, vec!["viewer".to_string()]);

        // Already connected viewers are not dialed again
        assist.share_group(&group(), &["view-er".to_string()]);
        assert_eq!(assist.network().connects.len(), 1);
    }

    #[test]
    fn test_sender_pushes_group_on_open_and_fans_out_deltas() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();
        assist.handle_event(PeerEvent::Open("sender".to_string()), &mut handler);
        assist.share_group(&group(), &["viewer".to_string()]);

        // Nothing is sent before the channel opens
        assist.broadcast(&position_update("s1"));
        assert!(assist.network().sent.is_empty());

        assist.handle_event(
            PeerEvent::ChannelOpened {
                channel: 1,
                inbound: false,
            },
            &mut handler,
        );
        assist.broadcast(&position_update("s1"));

        assert_eq!(
            assist.network().sent,
            vec![
                (1, PeerPacket::Group { group: group() }),
                (1, PeerPacket::Data(position_update("s1"))),
            ]
        );
    }

    #[test]
    fn test_drop_connection_closes_channel() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();
        assist.handle_event(PeerEvent::Open("sender".to_string()), &mut handler);
        assist.share_group(&group(), &["viewer".to_string()]);
        assist.handle_event(
            PeerEvent::ChannelOpened {
                channel: 1,
                inbound: false,
            },
            &mut handler,
        );

        assist.drop_connection("viewer");

        assert_eq!(assist.network().closed, vec![1]);
        assert_eq!(assist.open_channels(), 0);
    }

    #[test]
    fn test_broker_disconnect_reconnects_infrastructure_only() {
        let mut assist = assist();
        let mut handler = RecordingHandler::default();
        assist.handle_event(
            PeerEvent::ChannelOpened {
                channel: 2,
                inbound: true,
            },
            &mut handler,
        );

        assist.handle_event(PeerEvent::Disconnected, &mut handler);
        assist.handle_event(
            PeerEvent::Error(PeerError::Channel(2, "ice failed".to_string())),
            &mut handler,
        );

        assert_eq!(assist.network().reconnects, 1);
        assert!(assist.network().closed.is_empty());
        assert_eq!(assist.open_channels(), 1);
    }

    #[test]
    fn test_no_peer_network_refuses_to_listen() {
        let mut assist = PeerAssist::new(NoPeerNetwork);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(assist.start("abc", tx), Err(PeerError::Unsupported));
    }
}
