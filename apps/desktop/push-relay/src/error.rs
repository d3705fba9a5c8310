use common::ErrorLocation;

use relay_core::error::CoreError;

use thiserror::Error;

/// Errors that end a push-relay process.
///
/// Anything reaching `main` is logged (and so lands in the crash log) before
/// the process exits non-zero.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Process setup failed before a role could run
    #[error("Startup Error: {message} {location}")]
    Startup {
        message: String,
        location: ErrorLocation,
    },

    /// The worker could not be told to stop
    #[error("Stop Error: {message} {location}")]
    StopFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}
