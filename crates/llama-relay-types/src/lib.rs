//! Shared types for the relay: wire protocol, resource status and errors.
//!
//! Everything that crosses a process boundary lives here so the coordinator,
//! the resource host and the client agree on one definition.

pub mod error;
pub mod protocol;
pub mod status;

pub use error::RelayError;
pub use protocol::*;
pub use status::{ResourceStatus, StatusRecord};
