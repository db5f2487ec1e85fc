//! Host resource usage reported next to the relay counters

use crate::error::AppError;
use serde::Serialize;
use std::sync::Mutex;
use sysinfo::{CpuExt, System, SystemExt};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CpuStats {
    pub count: usize,
    /// Global usage in percent since the previous sample
    pub usage: f32,
    /// 1, 5 and 15 minute load average
    pub average: [f64; 3],
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HostSnapshot {
    pub cpu: CpuStats,
    /// Free memory in MiB
    pub memory: f64,
}

/// Body of `GET /api/live/stats`
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StatsReport {
    pub players: usize,
    pub connections: usize,
    pub cpu: CpuStats,
    pub memory: f64,
}

impl StatsReport {
    pub fn new(players: usize, connections: usize, host: HostSnapshot) -> Self {
        StatsReport {
            players,
            connections,
            cpu: host.cpu,
            memory: host.memory,
        }
    }
}

/// Keeps one `System` around so CPU usage is measured between samples
///
/// The very first sample has nothing to compare against and may report 0%.
pub struct HostStats {
    system: Mutex<System>,
}

impl HostStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        HostStats {
            system: Mutex::new(system),
        }
    }

    pub fn sample(&self) -> Result<HostSnapshot, AppError> {
        if !System::IS_SUPPORTED {
            return Err(AppError::Stats("unsupported platform".to_string()));
        }

        let mut system = self
            .system
            .lock()
            .map_err(|_| AppError::Stats("collector poisoned".to_string()))?;

        system.refresh_cpu();
        system.refresh_memory();

        let load = system.load_average();
        Ok(HostSnapshot {
            cpu: CpuStats {
                count: system.cpus().len(),
                usage: system.global_cpu_info().cpu_usage(),
                average: [load.one, load.five, load.fifteen],
            },
            memory: system.free_memory() as f64 / BYTES_PER_MIB,
        })
    }
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}
