//! Error types for the neighbor cache
//!
//! Races between the cache and the switch state pipeline are not errors; they
//! are absorbed by discarding the stale update. The variants here cover
//! setup, parsing and the execution contexts the cache depends on.

use thiserror::Error;

/// Errors that can occur in the neighbor cache subsystem
#[derive(Debug, Error)]
pub enum NeighCacheError {
    /// MAC address string could not be parsed
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    /// IP prefix string could not be parsed
    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    /// VLAN identifier outside 1-4094
    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (thread spawn, runtime construction, config file access)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A task scheduled on an event base panicked
    #[error("task on event base {evb} panicked: {message}")]
    TaskPanicked { evb: String, message: String },

    /// A task was dropped before it ran because its event base stopped
    #[error("task on event base {0} was dropped before completion")]
    TaskCanceled(String),
}

/// Result type alias for neighbor cache operations
pub type Result<T> = std::result::Result<T, NeighCacheError>;
