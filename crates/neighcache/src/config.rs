//! Configuration file support for the neighbor cache
//!
//! Loads and validates cache timers from TOML files.
//! Default location: /etc/sonic/neighcache.conf

use crate::entry::NeighborEntryState;
use crate::error::{NeighCacheError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/neighcache.conf";

/// Neighbor cache timers and probing policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborCacheConfig {
    /// Time a REACHABLE entry stays confirmed before it goes STALE
    #[serde(default = "default_reachable_timeout")]
    pub reachable_timeout_secs: u64,

    /// Number of unanswered solicitations before an entry expires
    #[serde(default = "default_max_probes")]
    pub max_probes: u32,

    /// Interval between solicitations for INCOMPLETE and PROBE entries
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Time a STALE entry waits before it is re-probed
    #[serde(default = "default_stale_interval")]
    pub stale_interval_secs: u64,

    /// Time a DELAY entry waits before it is probed
    #[serde(default = "default_delay_interval")]
    pub delay_interval_secs: u64,

    /// States treated as "currently soliciting" by `is_solicited`
    #[serde(default = "default_probing_states")]
    pub probing_states: Vec<NeighborEntryState>,
}

fn default_reachable_timeout() -> u64 {
    60
}

fn default_max_probes() -> u32 {
    300
}

fn default_probe_interval() -> u64 {
    1000
}

fn default_stale_interval() -> u64 {
    10
}

fn default_delay_interval() -> u64 {
    5
}

fn default_probing_states() -> Vec<NeighborEntryState> {
    vec![NeighborEntryState::Incomplete, NeighborEntryState::Probe]
}

impl Default for NeighborCacheConfig {
    fn default() -> Self {
        Self {
            reachable_timeout_secs: default_reachable_timeout(),
            max_probes: default_max_probes(),
            probe_interval_ms: default_probe_interval(),
            stale_interval_secs: default_stale_interval(),
            delay_interval_secs: default_delay_interval(),
            probing_states: default_probing_states(),
        }
    }
}

impl NeighborCacheConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let config: Self = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NeighCacheError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(NeighCacheError::Io(e)),
        };

        config.validate()?;
        info!(path = %path.display(), ?config, "Loaded neighbor cache configuration");
        Ok(config)
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.reachable_timeout_secs == 0 {
            return Err(NeighCacheError::Config(
                "reachable_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(NeighCacheError::Config(
                "probe_interval_ms must be > 0".to_string(),
            ));
        }
        if self.stale_interval_secs == 0 || self.delay_interval_secs == 0 {
            return Err(NeighCacheError::Config(
                "stale_interval_secs and delay_interval_secs must be > 0".to_string(),
            ));
        }
        if self.probing_states.contains(&NeighborEntryState::Expired) {
            return Err(NeighCacheError::Config(
                "EXPIRED entries cannot be treated as probing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reachable_timeout(&self) -> Duration {
        Duration::from_secs(self.reachable_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn stale_interval(&self) -> Duration {
        Duration::from_secs(self.stale_interval_secs)
    }

    pub fn delay_interval(&self) -> Duration {
        Duration::from_secs(self.delay_interval_secs)
    }

    /// Timer interval an entry waits in `state` before its next tick.
    ///
    /// Returns `None` for EXPIRED; expired entries are never ticked again.
    pub fn interval_for(&self, state: NeighborEntryState) -> Option<Duration> {
        match state {
            NeighborEntryState::Incomplete | NeighborEntryState::Probe => {
                Some(self.probe_interval())
            }
            NeighborEntryState::Reachable => Some(self.reachable_timeout()),
            NeighborEntryState::Stale => Some(self.stale_interval()),
            NeighborEntryState::Delay => Some(self.delay_interval()),
            NeighborEntryState::Expired => None,
        }
    }

    /// Returns true if entries in `state` count as solicited.
    pub fn is_probing_state(&self, state: NeighborEntryState) -> bool {
        self.probing_states.contains(&state)
    }
}
