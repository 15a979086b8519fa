//! Simulator error types.

use thiserror::Error;
use venue_core::VenueError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}
