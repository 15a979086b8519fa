//! Error types for the venue core.

use crate::protocol::ProtocolError;
use thiserror::Error;
use venue_env::FabricError;

/// Errors surfaced by the broker, the agents and configuration loading.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel fabric failure
    #[error("fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// Wire record could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The broker's inbound channel was already released
    #[error("inbound channel released")]
    InboundReleased,

    /// The statistics sink rejected the summary
    #[error("statistics sink failed: {0}")]
    StatsSink(String),
}

impl VenueError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
