use log::debug;
use serde::Deserialize;
use shared::{ConnectionId, ServerPacket, UNSET_PLACEHOLDER};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::RelayError;

/// Frames a connection may have waiting for its socket writer
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Query parameters sent with the WebSocket upgrade request
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub token: Option<String>,
    pub is_overwolf_app: Option<String>,
    pub steam_id: Option<String>,
    pub steam_name: Option<String>,
}

/// Validated handshake
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub token: String,
    pub is_authoritative: bool,
    pub steam_id: Option<String>,
    pub steam_name: Option<String>,
}

impl Handshake {
    pub fn validate(self) -> Result<JoinRequest, RelayError> {
        let token = self
            .token
            .filter(|token| !token.is_empty())
            .ok_or(RelayError::MissingToken)?;

        Ok(JoinRequest {
            token,
            is_authoritative: self.is_overwolf_app.as_deref() == Some("true"),
            steam_id: identity_hint(self.steam_id),
            steam_name: identity_hint(self.steam_name),
        })
    }
}

fn identity_hint(value: Option<String>) -> Option<String> {
    value.filter(|v| v != UNSET_PLACEHOLDER)
}

// Relay-side record of one live connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub token: String,
    pub is_authoritative: bool,
    pub steam_id: Option<String>,
    pub steam_name: Option<String>,
    pub connected_at: Instant,
    sender: mpsc::Sender<ServerPacket>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        request: JoinRequest,
        sender: mpsc::Sender<ServerPacket>,
    ) -> Self {
        Connection {
            id,
            token: request.token,
            is_authoritative: request.is_authoritative,
            steam_id: request.steam_id,
            steam_name: request.steam_name,
            connected_at: Instant::now(),
            sender,
        }
    }

    // Queue a packet for the socket writer; false once the socket is gone.
    // A full queue drops the packet, the next update supersedes it.
    pub fn send(&self, packet: ServerPacket) -> bool {
        match self.sender.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue of {} is full, dropping packet", self.id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
