pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod handshake;
pub mod lifecycle;
pub mod notify;
pub mod pipe;
pub mod protocol;
pub mod settings;
pub mod worker;

#[cfg(test)]
mod tests;

pub const APP_NAME: &str = "push-relay";
pub const PROTOCOL_VERSION: &str = "1";
pub const CHILD_MARKER: &str = "child";
pub const RETRY_TOKEN_PREFIX: &str = "$cout:";
pub const NOTIFICATION_SUFFIX: &str = "_notification";
pub const PIPE_SUFFIX: &str = const_format::concatcp!(NOTIFICATION_SUFFIX, "_pipe");
pub const CONTROLLER_PIPE_SUFFIX: &str = "_host";
pub const LIVENESS_RECORD_FILE: &str = "app_system.ini";
pub const CRASH_LOG_FILE: &str = "crash.txt";
