//! Engine configuration.

use std::time::Duration;

use anyhow::Result;

/// Tunables for the engine runtime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Length of one grid slot in minutes. Block duration is
    /// `slot_count × slot_minutes`.
    pub slot_minutes: u32,
    /// How long a persistence call may take before it counts as failed.
    pub persist_timeout: Duration,
    /// Capacity of the local command queue.
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            persist_timeout: Duration::from_secs(10),
            command_buffer: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let slot_minutes = match std::env::var("BLOCKPLAN_SLOT_MINUTES") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.slot_minutes,
        };

        let persist_timeout = match std::env::var("BLOCKPLAN_PERSIST_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(v.parse()?),
            Err(_) => defaults.persist_timeout,
        };

        let command_buffer = match std::env::var("BLOCKPLAN_COMMAND_BUFFER") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.command_buffer,
        };

        anyhow::ensure!(slot_minutes > 0, "BLOCKPLAN_SLOT_MINUTES must be positive");
        anyhow::ensure!(command_buffer > 0, "BLOCKPLAN_COMMAND_BUFFER must be positive");

        Ok(Self {
            slot_minutes,
            persist_timeout,
            command_buffer,
        })
    }

    /// The slot unit as a time delta.
    pub fn slot_unit(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::minutes(i64::from(self.slot_minutes))
    }
}
