use common::ErrorLocation;

use std::error::Error as StdError;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SpawnError {
    #[error("Spawn Error: {message} {location}")]
    Spawn {
        message: String,
        location: ErrorLocation,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The respawn budget is exhausted; the worker keeps dying before it
    /// completes a handshake.
    #[error("Spawn Limit Error: gave up after {attempts} attempts {location}")]
    Limit {
        attempts: u32,
        location: ErrorLocation,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },

    #[error("Liveness Record Error: {message} {location}")]
    Record {
        message: String,
        location: ErrorLocation,
    },
}

impl SpawnError {
    pub fn is_limit(&self) -> bool {
        matches!(self, SpawnError::Limit { .. })
    }
}
