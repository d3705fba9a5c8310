//! Types shared by every crate in the push-relay workspace.
//!
//! ## Architecture
//!
//! - **common** (this crate): error-site tracking used by all error enums
//! - **relay-core**: transport, lifecycle, handshake and connection logic
//! - **push-relay**: the desktop binary running as controller or worker
//!
//! Keeping [`ErrorLocation`] here lets every crate report where a failure
//! was raised without depending on the core crate.

pub mod error;


pub use error::error_location::ErrorLocation;
