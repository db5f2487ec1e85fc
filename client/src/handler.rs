//! Callbacks through which a running client reports relay events

use shared::{AttributeUpdate, Group, Presence, RespawnNotice};

/// Receives everything the client learns from the relay and from peers
///
/// Every method has an empty default so implementors only pick the events
/// they care about. Callbacks run on the client task and should return quickly.
pub trait RelayHandler: Send + 'static {
    /// The relay accepted the connection under `connection_id`
    fn on_connect(&mut self, _connection_id: &str) {}

    /// Full participant map, from a status broadcast, a status reply or a peer push
    fn on_group(&mut self, _group: &Group) {}

    /// Single attribute delta of one participant
    fn on_player(&mut self, _update: &AttributeUpdate) {}

    fn on_hotkey(&mut self, _steam_id: Option<&str>, _hotkey: &str) {}

    fn on_connected(&mut self, _presence: &Presence) {}

    fn on_disconnected(&mut self, _presence: &Presence) {}

    fn on_respawn(&mut self, _notice: &RespawnNotice) {}

    /// The relay connection ended
    fn on_close(&mut self) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl RelayHandler for NoopHandler {}
