//! Peer links reported by clients
//!
//! A link says "this relay connection already receives updates for this
//! steam id over a direct peer channel". The relay consults it to skip
//! redundant `data` fan-out. Links are trusted as reported.

use shared::ConnectionId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct PeerLinks {
    links: HashMap<String, HashSet<ConnectionId>>,
}

impl PeerLinks {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    pub fn link(&mut self, steam_id: &str, connection_id: &str) {
        self.links
            .entry(steam_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub fn unlink(&mut self, steam_id: &str, connection_id: &str) {
        if let Some(connections) = self.links.get_mut(steam_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                self.links.remove(steam_id);
            }
        }
    }

    /// Removes a connection from every link set it belongs to
    pub fn drop_connection(&mut self, connection_id: &str) {
        self.links.retain(|_, connections| {
            connections.remove(connection_id);
            !connections.is_empty()
        });
    }

    pub fn is_linked(&self, steam_id: &str, connection_id: &str) -> bool {
        self.links
            .get(steam_id)
            .is_some_and(|connections| connections.contains(connection_id))
    }
}
