//! Read-only HTTP API under `/api/live`, plus the WebSocket route

use crate::error::AppError;
use crate::network::ws_handler;
use crate::registry::{PlayerFilter, PublicPlayer};
use crate::relay::RelayHandle;
use crate::respawn::{MarkerRespawn, WorldRespawn};
use crate::stats::{HostStats, StatsReport};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use shared::Group;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub host: Arc<HostStats>,
}

impl AppState {
    pub fn new(relay: RelayHandle) -> Self {
        AppState {
            relay,
            host: Arc::new(HostStats::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/live/ping", get(ping))
        .route("/api/live/stats", get(stats))
        .route("/api/live", get(players))
        .route("/api/live/", get(players))
        .route("/api/live/respawns", get(respawns))
        .route("/api/live/respawns/{world_name}", get(world_respawns))
        .route("/api/live/{token}", get(group))
        .with_state(state)
}

async fn ping() -> &'static str {
    "OK"
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    let relay = state.relay.stats().await?;

    let host = Arc::clone(&state.host);
    let host = tokio::task::spawn_blocking(move || host.sample())
        .await
        .map_err(|e| AppError::Stats(e.to_string()))??;

    Ok(Json(StatsReport::new(relay.groups, relay.connections, host)))
}

#[derive(Debug, Deserialize, Default)]
pub struct PlayerQuery {
    pub location: Option<String>,
    pub region: Option<String>,
}

impl PlayerQuery {
    pub fn into_filter(self) -> Result<PlayerFilter, AppError> {
        fn compile(pattern: Option<String>) -> Result<Option<Regex>, regex::Error> {
            pattern
                .map(|p| RegexBuilder::new(&p).case_insensitive(true).build())
                .transpose()
        }

        Ok(PlayerFilter {
            location: compile(self.location)?,
            region: compile(self.region)?,
        })
    }
}

async fn players(
    State(state): State<AppState>,
    Query(query): Query<PlayerQuery>,
) -> Result<Json<Vec<PublicPlayer>>, AppError> {
    let filter = query.into_filter()?;
    Ok(Json(state.relay.public_players(filter).await?))
}

async fn respawns(State(state): State<AppState>) -> Result<Json<Vec<WorldRespawn>>, AppError> {
    Ok(Json(state.relay.all_respawns().await?))
}

async fn world_respawns(
    State(state): State<AppState>,
    Path(world_name): Path<String>,
) -> Result<Json<Vec<MarkerRespawn>>, AppError> {
    Ok(Json(state.relay.world_respawns(&world_name).await?))
}

async fn group(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Group>, AppError> {
    state
        .relay
        .group(&token)
        .await?
        .map(Json)
        .ok_or(AppError::GroupNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builds_case_insensitive_filter() {
        let query = PlayerQuery {
            location: Some("^ebon".to_string()),
            region: None,
        };
        let filter = query.into_filter().unwrap();

        assert!(filter.location.unwrap().is_match("Ebonscale Reach"));
        assert!(filter.region.is_none());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let query = PlayerQuery {
            location: None,
            region: Some("(".to_string()),
        };

        assert!(matches!(
            query.into_filter(),
            Err(AppError::InvalidFilter(_))
        ));
    }
}
