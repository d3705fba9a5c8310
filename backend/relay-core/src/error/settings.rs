use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SettingsError {
    #[error("Settings Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Settings Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Launch Argument Error: {message} {location}")]
    Launch {
        message: String,
        location: ErrorLocation,
    },
}

impl From<serde_json::Error> for SettingsError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        SettingsError::Decode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
