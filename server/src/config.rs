use axum::http::{HeaderValue, Method};
use clap::Parser;
use shared::RESPAWN_SWEEP_INTERVAL;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Command line arguments of the relay server, each with an environment fallback
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port serving both the WebSocket endpoint and the HTTP API
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,
    /// Allowed CORS origin, `*` or a comma separated list
    #[arg(long, env = "CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,
    /// Seconds between respawn ledger sweeps
    #[arg(long, env = "RESPAWN_SWEEP_SECS", default_value = "30")]
    pub respawn_sweep_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origin: "*".to_string(),
            respawn_sweep_secs: RESPAWN_SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make the interval panic
        Duration::from_secs(self.respawn_sweep_secs.max(1))
    }

    pub fn cors_layer(&self) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
        let origin = if self.cors_origin.trim() == "*" {
            AllowOrigin::from(Any)
        } else {
            let origins = self
                .cors_origin
                .split(',')
                .map(|origin| HeaderValue::from_str(origin.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(origins)
        };

        Ok(CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST]))
    }
}
