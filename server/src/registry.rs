//! Group registry: who is in which group and what they last published
//!
//! This module holds the in-memory source of truth for live groups:
//! - Groups are created implicitly on first join
//! - Only authoritative connections get a participant entry
//! - Attribute publishes overwrite exactly one field, last write wins
//! - Groups disappear when the transport reports their room as deleted
//!
//! The registry has no interior synchronisation. It is owned by the relay
//! actor, which applies every mutation from a single task.

use regex::Regex;
use serde::Serialize;
use shared::{Attribute, Group, Participant, Position};
use std::collections::HashMap;

/// Anonymous view of a participant, exposed on the public listing
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

/// Optional label filters for the public listing
///
/// A participant without the filtered label never matches.
#[derive(Debug, Default, Clone)]
pub struct PlayerFilter {
    pub location: Option<Regex>,
    pub region: Option<Regex>,
}

impl PlayerFilter {
    fn matches(&self, participant: &Participant) -> bool {
        fn label_matches(pattern: &Option<Regex>, label: &Option<String>) -> bool {
            match pattern {
                Some(pattern) => label.as_deref().is_some_and(|l| pattern.is_match(l)),
                None => true,
            }
        }

        label_matches(&self.location, &participant.location)
            && label_matches(&self.region, &participant.region)
    }
}

/// Maps group tokens to their participants
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Group>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// Registers a connection in a group
    ///
    /// Ensures the group exists. Authoritative connections get a participant
    /// carrying only their identity hints; passive viewers get nothing.
    /// Joining twice overwrites the entry instead of duplicating it.
    /// Returns true if a participant entry was newly created.
    pub fn join(
        &mut self,
        token: &str,
        connection_id: &str,
        is_authoritative: bool,
        steam_id: Option<String>,
        steam_name: Option<String>,
    ) -> bool {
        let group = self.groups.entry(token.to_string()).or_default();

        if !is_authoritative {
            return false;
        }

        group
            .insert(
                connection_id.to_string(),
                Participant::new(steam_id, steam_name),
            )
            .is_none()
    }

    /// Overwrites one attribute of an existing participant
    ///
    /// Connections without a participant entry cannot publish; the update is
    /// ignored and None is returned.
    pub fn publish(
        &mut self,
        token: &str,
        connection_id: &str,
        attribute: Attribute,
    ) -> Option<&Participant> {
        let participant = self.groups.get_mut(token)?.get_mut(connection_id)?;
        participant.apply(attribute);
        Some(participant)
    }

    /// Removes a participant entry, leaving the group itself in place
    pub fn leave(&mut self, token: &str, connection_id: &str) -> Option<Participant> {
        self.groups.get_mut(token)?.remove(connection_id)
    }

    /// Copy of a group's participants, empty if the group is unknown
    pub fn snapshot(&self, token: &str) -> Group {
        self.groups.get(token).cloned().unwrap_or_default()
    }

    pub fn group(&self, token: &str) -> Option<&Group> {
        self.groups.get(token)
    }

    pub fn contains(&self, token: &str, connection_id: &str) -> bool {
        self.groups
            .get(token)
            .is_some_and(|group| group.contains_key(connection_id))
    }

    /// Drops a group once its transport room has no connections left
    pub fn room_deleted(&mut self, token: &str) {
        self.groups.remove(token);
    }

    /// Number of groups currently tracked
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Every participant that has published a position, across all groups
    pub fn public_players(&self, filter: &PlayerFilter) -> Vec<PublicPlayer> {
        self.groups
            .values()
            .flat_map(|group| group.values())
            .filter(|participant| filter.matches(participant))
            .filter_map(|participant| {
                participant.position.map(|position| PublicPlayer {
                    position,
                    location: participant.location.clone(),
                    region: participant.region.clone(),
                    world_name: participant.world_name.clone(),
                    map: participant.map.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;

    fn position(x: f64, y: f64) -> Position {
        Position {
            location: [x, y],
            rotation: 0.0,
        }
    }

    fn registry_with_sender() -> GroupRegistry {
        let mut registry = GroupRegistry::new();
        registry.join("g1", "a", true, Some("s1".to_string()), Some("Alice".to_string()));
        registry
    }

    #[test]
    fn test_join_authoritative_creates_identity_only_participant() {
        let registry = registry_with_sender();
        let group = registry.snapshot("g1");

        let participant = group.get("a").unwrap();
        assert_eq!(participant.steam_id.as_deref(), Some("s1"));
        assert_eq!(participant.steam_name.as_deref(), Some("Alice"));
        assert_eq!(participant.position, None);
        assert_eq!(participant.username, None);
    }

    #[test]
    fn test_join_passive_creates_group_but_no_participant() {
        let mut registry = GroupRegistry::new();
        let created = registry.join("g1", "viewer", false, Some("s9".to_string()), None);

        assert!(!created);
        assert_eq!(registry.group_count(), 1);
        assert!(!registry.contains("g1", "viewer"));
        assert!(registry.snapshot("g1").is_empty());
    }

    #[test]
    fn test_join_twice_overwrites() {
        let mut registry = registry_with_sender();
        let created = registry.join("g1", "a", true, Some("s1".to_string()), None);

        assert!(!created);
        assert_eq!(registry.snapshot("g1").len(), 1);
    }

    #[test]
    fn test_publish_requires_participant() {
        let mut registry = GroupRegistry::new();
        registry.join("g1", "viewer", false, None, None);

        let applied = registry.publish("g1", "viewer", Attribute::Map("newworld".to_string()));
        assert!(applied.is_none());

        let unknown_group = registry.publish("nope", "a", Attribute::Map("x".to_string()));
        assert!(unknown_group.is_none());
    }

    #[test]
    fn test_publish_last_write_wins_per_attribute() {
        let mut registry = registry_with_sender();

        registry.publish("g1", "a", Attribute::Location("Ebonscale Reach".to_string()));
        registry.publish("g1", "a", Attribute::Position(position(1.0, 2.0)));
        registry.publish("g1", "a", Attribute::Position(position(3.0, 4.0)));

        let group = registry.snapshot("g1");
        let participant = group.get("a").unwrap();
        assert_eq!(participant.position, Some(position(3.0, 4.0)));
        assert_eq!(participant.location.as_deref(), Some("Ebonscale Reach"));
        assert_eq!(participant.steam_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut registry = registry_with_sender();

        assert!(registry.leave("g1", "a").is_some());
        assert!(!registry.snapshot("g1").contains_key("a"));
        assert!(registry.leave("g1", "a").is_none());
        assert!(registry.leave("unknown", "a").is_none());

        // The group lingers until its room is deleted
        assert_eq!(registry.group_count(), 1);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let mut registry = registry_with_sender();
        let before = registry.snapshot("g1");

        registry.publish("g1", "a", Attribute::Username("Al".to_string()));

        assert_eq!(before.get("a").unwrap().username, None);
        assert_eq!(
            registry.snapshot("g1").get("a").unwrap().username.as_deref(),
            Some("Al")
        );
    }

    #[test]
    fn test_room_deleted_clears_group() {
        let mut registry = registry_with_sender();
        registry.room_deleted("g1");

        assert!(registry.group("g1").is_none());
        assert!(registry.snapshot("g1").is_empty());
        assert_eq!(registry.group_count(), 0);
    }

    #[test]
    fn test_public_players_only_lists_positioned_participants() {
        let mut registry = registry_with_sender();
        registry.join("g2", "b", true, Some("s2".to_string()), None);
        registry.publish("g2", "b", Attribute::Position(position(5.0, 6.0)));
        registry.publish("g2", "b", Attribute::Region("Everfall".to_string()));

        let players = registry.public_players(&PlayerFilter::default());
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].position, position(5.0, 6.0));
        assert_eq!(players[0].region.as_deref(), Some("Everfall"));
    }

    #[test]
    fn test_public_players_filters_case_insensitively() {
        let mut registry = GroupRegistry::new();
        registry.join("g1", "a", true, None, None);
        registry.publish("g1", "a", Attribute::Position(position(1.0, 1.0)));
        registry.publish("g1", "a", Attribute::Region("Everfall".to_string()));
        registry.join("g1", "b", true, None, None);
        registry.publish("g1", "b", Attribute::Position(position(2.0, 2.0)));

        let filter = PlayerFilter {
            region: Some(
                RegexBuilder::new("everf")
                    .case_insensitive(true)
                    .build()
                    .unwrap(),
            ),
            location: None,
        };

        let players = registry.public_players(&filter);
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].position, position(1.0, 1.0));
    }
}
