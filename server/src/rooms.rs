//! Transport-level room membership
//!
//! Every accepted connection is a member of the room named after its group
//! token, authoritative or not. Leaving the last member deletes the room,
//! which is the signal the group registry uses to forget a group.

use shared::ConnectionId;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct Rooms {
    rooms: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    pub fn join(&mut self, token: &str, connection_id: &str) {
        self.rooms
            .entry(token.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    /// Removes a member; returns true if the room was deleted as a result.
    pub fn leave(&mut self, token: &str, connection_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(token) else {
            return false;
        };

        members.remove(connection_id);
        if members.is_empty() {
            self.rooms.remove(token);
            return true;
        }
        false
    }

    pub fn members(&self, token: &str) -> impl Iterator<Item = &ConnectionId> {
        self.rooms.get(token).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_member_deletes_room() {
        let mut rooms = Rooms::new();
        rooms.join("g1", "a");
        rooms.join("g1", "b");

        assert!(!rooms.leave("g1", "a"));
        assert_eq!(rooms.members("g1").count(), 1);
        assert!(rooms.leave("g1", "b"));
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_leave_unknown_room() {
        let mut rooms = Rooms::new();
        assert!(!rooms.leave("nope", "a"));
        assert_eq!(rooms.members("nope").count(), 0);
    }

    #[test]
    fn test_members_are_ordered() {
        let mut rooms = Rooms::new();
        rooms.join("g1", "c");
        rooms.join("g1", "a");
        rooms.join("g2", "b");

        let members: Vec<_> = rooms.members("g1").cloned().collect();
        assert_eq!(members, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(rooms.len(), 2);
    }
}
