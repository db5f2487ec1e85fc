//! Ledger of scheduled marker respawns, shared by all groups

use serde::Serialize;
use shared::{RespawnReport, RespawnTimer};

#[derive(Debug, Clone, PartialEq)]
pub struct RespawnEntry {
    pub world_name: String,
    pub token: String,
    pub marker_id: String,
    pub marker_type: String,
    pub steam_id: Option<String>,
    /// Epoch milliseconds
    pub respawn_at: i64,
}

impl RespawnEntry {
    fn remaining(&self, now: i64) -> i64 {
        self.respawn_at - now
    }

    fn is_pending(&self, now: i64) -> bool {
        self.respawn_at > now
    }
}

/// Pending respawn across every world, as shown on `/respawns`
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorldRespawn {
    pub marker_id: String,
    pub respawn_timer: i64,
    pub world_name: String,
    pub marker_type: String,
}

/// Pending respawn of one world, as shown on `/respawns/{worldName}`
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRespawn {
    pub marker_id: String,
    pub respawn_timer: i64,
    pub marker_type: String,
}

#[derive(Debug, Default)]
pub struct RespawnLedger {
    entries: Vec<RespawnEntry>,
}

impl RespawnLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records a report received at `now`, returning the stored entry.
    pub fn record(
        &mut self,
        token: &str,
        report: RespawnReport,
        steam_id: Option<String>,
        now: i64,
    ) -> &RespawnEntry {
        let index = self.entries.len();
        self.entries.push(RespawnEntry {
            world_name: report.world_name,
            token: token.to_string(),
            marker_id: report.marker_id,
            marker_type: report.marker_type,
            steam_id,
            respawn_at: now.saturating_add(report.respawn_timer),
        });
        &self.entries[index]
    }

    /// Drops every entry whose respawn time has passed; returns how many went.
    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.is_pending(now));
        before - self.entries.len()
    }

    /// Pending timers of one group in one world, remaining time recomputed at `now`.
    pub fn timers_for(&self, world_name: &str, token: &str, now: i64) -> Vec<RespawnTimer> {
        self.pending(now)
            .filter(|entry| entry.world_name == world_name && entry.token == token)
            .map(|entry| RespawnTimer {
                marker_id: entry.marker_id.clone(),
                respawn_timer: entry.remaining(now),
                steam_id: entry.steam_id.clone(),
                marker_type: entry.marker_type.clone(),
            })
            .collect()
    }

    pub fn all_timers(&self, now: i64) -> Vec<WorldRespawn> {
        self.pending(now)
            .map(|entry| WorldRespawn {
                marker_id: entry.marker_id.clone(),
                respawn_timer: entry.remaining(now),
                world_name: entry.world_name.clone(),
                marker_type: entry.marker_type.clone(),
            })
            .collect()
    }

    pub fn world_timers(&self, world_name: &str, now: i64) -> Vec<MarkerRespawn> {
        self.pending(now)
            .filter(|entry| entry.world_name == world_name)
            .map(|entry| MarkerRespawn {
                marker_id: entry.marker_id.clone(),
                respawn_timer: entry.remaining(now),
                marker_type: entry.marker_type.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pending(&self, now: i64) -> impl Iterator<Item = &RespawnEntry> {
        self.entries.iter().filter(move |entry| entry.is_pending(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(marker_id: &str, respawn_timer: i64, world_name: &str) -> RespawnReport {
        RespawnReport {
            marker_id: marker_id.to_string(),
            respawn_timer,
            world_name: world_name.to_string(),
            steam_id: None,
            marker_type: "chest".to_string(),
        }
    }

    #[test]
    fn test_query_recomputes_remaining_time() {
        let mut ledger = RespawnLedger::new();
        let entry = ledger.record(
            "g1",
            report("m1", 60_000, "Aeternum"),
            Some("s1".to_string()),
            1_000,
        );
        assert_eq!(entry.respawn_at, 61_000);

        let timers = ledger.timers_for("Aeternum", "g1", 5_000);
        assert_eq!(
            timers,
            vec![RespawnTimer {
                marker_id: "m1".to_string(),
                respawn_timer: 56_000,
                steam_id: Some("s1".to_string()),
                marker_type: "chest".to_string(),
            }]
        );

        assert!(ledger.timers_for("Aeternum", "g1", 62_000).is_empty());
    }

    #[test]
    fn test_query_filters_world_and_group() {
        let mut ledger = RespawnLedger::new();
        ledger.record("g1", report("m1", 10_000, "Aeternum"), None, 0);
        ledger.record("g2", report("m2", 10_000, "Aeternum"), None, 0);
        ledger.record("g1", report("m3", 10_000, "Valhalla"), None, 0);

        let timers = ledger.timers_for("Aeternum", "g1", 0);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].marker_id, "m1");

        let world = ledger.world_timers("Aeternum", 0);
        assert_eq!(world.len(), 2);

        assert_eq!(ledger.all_timers(0).len(), 3);
    }

    #[test]
    fn test_sweep_drops_only_expired_entries() {
        let mut ledger = RespawnLedger::new();
        ledger.record("g1", report("expired", 1_000, "Aeternum"), None, 0);
        ledger.record("g1", report("boundary", 2_000, "Aeternum"), None, 0);
        ledger.record("g1", report("pending", 5_000, "Aeternum"), None, 0);

        let removed = ledger.sweep(2_000);

        assert_eq!(removed, 2);
        assert_eq!(ledger.len(), 1);
        let timers = ledger.timers_for("Aeternum", "g1", 2_000);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].marker_id, "pending");
        assert_eq!(timers[0].respawn_timer, 3_000);
    }

    #[test]
    fn test_expired_entries_hidden_before_sweep() {
        let mut ledger = RespawnLedger::new();
        ledger.record("g1", report("m1", 100, "Aeternum"), None, 0);

        assert!(ledger.all_timers(500).is_empty());
        assert!(!ledger.is_empty());
    }

    #[test]
    fn test_negative_timer_is_already_expired() {
        let mut ledger = RespawnLedger::new();
        ledger.record("g1", report("m1", -5, "Aeternum"), None, 1_000);

        assert!(ledger.timers_for("Aeternum", "g1", 1_000).is_empty());
        assert_eq!(ledger.sweep(1_000), 1);
    }
}
