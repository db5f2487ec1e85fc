//! Wire protocol spoken between the live relay server, the sharing companion app
//! and the map viewers.
//!
//! Every frame on the relay WebSocket is a JSON object of the form
//! `{"event": <name>, "data": <payload>}`. Peer channels carry bare
//! [`PeerPacket`] objects without the envelope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Literal sent by clients for identity hints they do not have.
pub const UNSET_PLACEHOLDER: &str = "undefined";
/// How often the server drops expired respawn entries.
pub const RESPAWN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Server-assigned identifier of one relay connection.
pub type ConnectionId = String;

/// Participants of one group keyed by their relay connection id.
pub type Group = BTreeMap<ConnectionId, Participant>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub location: [f64; 2],
    pub rotation: f64,
}

/// Last known state of an authoritative connection inside a group.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

impl Participant {
    /// Creates a participant that only knows who it is.
    pub fn new(steam_id: Option<String>, steam_name: Option<String>) -> Self {
        Self {
            steam_id,
            steam_name,
            ..Self::default()
        }
    }

    /// Overwrites exactly the attribute carried by `attribute`.
    pub fn apply(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::Position(position) => self.position = Some(position),
            Attribute::Location(location) => self.location = Some(location),
            Attribute::Region(region) => self.region = Some(region),
            Attribute::WorldName(world_name) => self.world_name = Some(world_name),
            Attribute::Map(map) => self.map = Some(map),
            Attribute::Username(username) => self.username = Some(username),
        }
    }
}

/// One publishable participant attribute.
///
/// Serialized externally tagged, so inside an [`AttributeUpdate`] it shows up
/// as a single `"<attribute>": value` field next to `steamId`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Position(Position),
    Location(String),
    Region(String),
    WorldName(String),
    Map(String),
    Username(String),
}

impl Attribute {
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Position(_) => "position",
            Attribute::Location(_) => "location",
            Attribute::Region(_) => "region",
            Attribute::WorldName(_) => "worldName",
            Attribute::Map(_) => "map",
            Attribute::Username(_) => "username",
        }
    }
}

/// Single attribute delta: `{steamId, <attribute>: value}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributeUpdate {
    #[serde(default)]
    pub steam_id: Option<String>,
    #[serde(flatten)]
    pub attribute: Attribute,
}

impl AttributeUpdate {
    pub fn new(steam_id: Option<String>, attribute: Attribute) -> Self {
        Self {
            steam_id,
            attribute,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RespawnReport {
    pub marker_id: String,
    /// Milliseconds from now until the marker respawns.
    pub respawn_timer: i64,
    pub world_name: String,
    #[serde(default)]
    pub steam_id: Option<String>,
    pub marker_type: String,
}

/// Respawn report as relayed to the rest of the room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RespawnNotice {
    pub marker_id: String,
    pub respawn_timer: i64,
    pub steam_id: Option<String>,
    pub marker_type: String,
}

/// Remaining time of a pending respawn, computed at query time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RespawnTimer {
    pub marker_id: String,
    pub respawn_timer: i64,
    pub steam_id: Option<String>,
    pub marker_type: String,
}

/// Announcement of a connection joining or leaving a room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub is_authoritative: bool,
    pub display_name: Option<String>,
    pub connection_id: ConnectionId,
}

/// Frames sent by clients to the relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientPacket {
    Status {
        request_id: u64,
    },
    Position(Position),
    Location(String),
    Region(String),
    WorldName(String),
    Map(String),
    Username(String),
    Hotkey(String),
    MarkerRespawnAt(RespawnReport),
    MarkersRespawnTimers {
        request_id: u64,
        world_name: String,
    },
    #[serde(rename = "peer:on")]
    PeerOn(String),
    #[serde(rename = "peer:off")]
    PeerOff(String),
}

impl ClientPacket {
    pub fn publish(attribute: Attribute) -> Self {
        match attribute {
            Attribute::Position(position) => ClientPacket::Position(position),
            Attribute::Location(location) => ClientPacket::Location(location),
            Attribute::Region(region) => ClientPacket::Region(region),
            Attribute::WorldName(world_name) => ClientPacket::WorldName(world_name),
            Attribute::Map(map) => ClientPacket::Map(map),
            Attribute::Username(username) => ClientPacket::Username(username),
        }
    }

    /// Splits attribute publishes from every other event.
    pub fn into_attribute(self) -> Result<Attribute, Self> {
        match self {
            ClientPacket::Position(position) => Ok(Attribute::Position(position)),
            ClientPacket::Location(location) => Ok(Attribute::Location(location)),
            ClientPacket::Region(region) => Ok(Attribute::Region(region)),
            ClientPacket::WorldName(world_name) => Ok(Attribute::WorldName(world_name)),
            ClientPacket::Map(map) => Ok(Attribute::Map(map)),
            ClientPacket::Username(username) => Ok(Attribute::Username(username)),
            other => Err(other),
        }
    }
}

/// Frames sent by the relay to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerPacket {
    Welcome {
        connection_id: ConnectionId,
    },
    Status(Group),
    StatusReply {
        request_id: u64,
        group: Group,
        connections: Vec<ConnectionId>,
    },
    Connected(Presence),
    Disconnected(Presence),
    Data(AttributeUpdate),
    Hotkey {
        steam_id: Option<String>,
        hotkey: String,
    },
    MarkerRespawnAt(RespawnNotice),
    RespawnTimers {
        request_id: u64,
        timers: Vec<RespawnTimer>,
    },
}

/// Frames exchanged over a direct peer channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PeerPacket {
    Group { group: Group },
    Data(AttributeUpdate),
}

/// Derives the peer-channel address of a relay connection.
///
/// Peer brokers only accept a restricted alphabet, so everything except
/// ASCII letters and spaces is stripped. Both ends compute the same value.
pub fn peer_id(connection_id: &str) -> String {
    connection_id
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;

    fn position() -> Position {
        Position {
            location: [10.0, 20.0],
            rotation: 90.0,
        }
    }

    #[test]
    fn test_data_event_shape() {
        let packet = ServerPacket::Data(AttributeUpdate::new(
            Some("s1".to_string()),
            Attribute::Position(position()),
        ));

        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "data",
                "data": {
                    "steamId": "s1",
                    "position": { "location": [10.0, 20.0], "rotation": 90.0 }
                }
            })
        );
    }

    #[test]
    fn test_parse_position_publish_with_integer_coordinates() {
        let text = r#"{"event":"position","data":{"location":[10,20],"rotation":90}}"#;
        let packet: ClientPacket = serde_json::from_str(text).unwrap();

        match packet.into_attribute() {
            Ok(Attribute::Position(p)) => {
                assert_approx_eq!(p.location[0], 10.0);
                assert_approx_eq!(p.location[1], 20.0);
                assert_approx_eq!(p.rotation, 90.0);
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_parse_peer_link_events() {
        let on: ClientPacket = serde_json::from_str(r#"{"event":"peer:on","data":"s1"}"#).unwrap();
        let off: ClientPacket =
            serde_json::from_str(r#"{"event":"peer:off","data":"s1"}"#).unwrap();

        assert_eq!(on, ClientPacket::PeerOn("s1".to_string()));
        assert_eq!(off, ClientPacket::PeerOff("s1".to_string()));
    }

    #[test]
    fn test_parse_request_ids() {
        let status: ClientPacket =
            serde_json::from_str(r#"{"event":"status","data":{"requestId":7}}"#).unwrap();
        assert_eq!(status, ClientPacket::Status { request_id: 7 });

        let timers: ClientPacket = serde_json::from_str(
            r#"{"event":"markersRespawnTimers","data":{"requestId":8,"worldName":"Aeternum"}}"#,
        )
        .unwrap();
        assert_eq!(
            timers,
            ClientPacket::MarkersRespawnTimers {
                request_id: 8,
                world_name: "Aeternum".to_string()
            }
        );
    }

    #[test]
    fn test_wrongly_typed_payload_is_rejected() {
        let result = serde_json::from_str::<ClientPacket>(r#"{"event":"location","data":42}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<ClientPacket>(r#"{"event":"teleport","data":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_respawn_report_without_steam_id() {
        let text = r#"{"event":"markerRespawnAt","data":{"markerId":"m1","respawnTimer":60000,"worldName":"Aeternum","markerType":"chest"}}"#;
        let packet: ClientPacket = serde_json::from_str(text).unwrap();

        match packet {
            ClientPacket::MarkerRespawnAt(report) => {
                assert_eq!(report.marker_id, "m1");
                assert_eq!(report.respawn_timer, 60_000);
                assert_eq!(report.steam_id, None);
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_participant_apply_keeps_other_attributes() {
        let mut participant = Participant::new(Some("s1".to_string()), None);
        participant.apply(Attribute::Region("Everfall".to_string()));
        participant.apply(Attribute::Position(position()));
        participant.apply(Attribute::Region("Windsward".to_string()));

        assert_eq!(participant.region.as_deref(), Some("Windsward"));
        assert_eq!(participant.position, Some(position()));
        assert_eq!(participant.steam_id.as_deref(), Some("s1"));
        assert_eq!(participant.username, None);
    }

    #[test]
    fn test_participant_serializes_null_position_and_username() {
        let participant = Participant::new(Some("s1".to_string()), Some("Alice".to_string()));
        let value = serde_json::to_value(&participant).unwrap();

        assert_eq!(
            value,
            json!({ "steamId": "s1", "steamName": "Alice", "username": null, "position": null })
        );
    }

    #[test]
    fn test_peer_packet_shapes() {
        let group: PeerPacket = serde_json::from_str(r#"{"group":{}}"#).unwrap();
        assert_eq!(
            group,
            PeerPacket::Group {
                group: Group::new()
            }
        );

        let delta: PeerPacket =
            serde_json::from_str(r#"{"steamId":"s1","worldName":"Aeternum"}"#).unwrap();
        assert_eq!(
            delta,
            PeerPacket::Data(AttributeUpdate::new(
                Some("s1".to_string()),
                Attribute::WorldName("Aeternum".to_string())
            ))
        );
    }

    #[test]
    fn test_peer_id_strips_unsafe_characters() {
        assert_eq!(peer_id("aB3-x_Y9z"), "aBxYz");
        assert_eq!(peer_id("0123456789-_"), "");
        assert_eq!(peer_id("plain"), "plain");
    }

    #[test]
    fn test_publish_round_trips_through_attribute() {
        let attribute = Attribute::Username("Alice".to_string());
        let packet = ClientPacket::publish(attribute.clone());

        assert_eq!(packet, ClientPacket::Username("Alice".to_string()));
        assert_eq!(packet.into_attribute(), Ok(attribute));
        assert!(ClientPacket::Hotkey("map".to_string())
            .into_attribute()
            .is_err());
    }
}
