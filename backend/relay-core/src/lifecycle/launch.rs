//! Launch argument contract: `<exe> child <settings token> $cout:<n>`.

use crate::error::settings::SettingsError;
use crate::settings::Settings;
use crate::{CHILD_MARKER, RETRY_TOKEN_PREFIX};

use common::ErrorLocation;

use std::panic::Location;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    Controller { retry: u32 },
    Worker { settings: Settings, retry: u32 },
}

impl LaunchMode {
    /// Parse a full argv, program name included.
    ///
    /// Anything without the `child` marker in first position runs as the
    /// controller. A worker whose settings token is missing or undecodable
    /// is an error the caller must treat as fatal.
    #[track_caller]
    pub fn parse<I, S>(args: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let retry = args.iter().skip(1).find_map(|a| parse_retry(a)).unwrap_or(0);

        if args.get(1).map(String::as_str) != Some(CHILD_MARKER) {
            return Ok(LaunchMode::Controller { retry });
        }

        let token = args
            .get(2)
            .filter(|token| !token.starts_with(RETRY_TOKEN_PREFIX))
            .ok_or_else(|| SettingsError::Launch {
                message: "Worker launched without a settings token".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let settings = Settings::decode_launch_token(token).map_err(|e| SettingsError::Launch {
            message: format!("Worker settings token is unreadable: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        Ok(LaunchMode::Worker { settings, retry })
    }

    pub fn retry(&self) -> u32 {
        match self {
            LaunchMode::Controller { retry } | LaunchMode::Worker { retry, .. } => *retry,
        }
    }
}

/// Arguments (after the program name) for a worker process.
pub fn worker_args(settings: &Settings, retry: u32) -> Result<Vec<String>, SettingsError> {
    Ok(vec![
        CHILD_MARKER.to_string(),
        settings.encode_launch_token()?,
        format!("{RETRY_TOKEN_PREFIX}{retry}"),
    ])
}

fn parse_retry(arg: &str) -> Option<u32> {
    arg.strip_prefix(RETRY_TOKEN_PREFIX)?.parse().ok()
}
