//! Client-facing error taxonomy.
//!
//! Every engine or transport failure is converted into one of these kinds at
//! the coordinator boundary before it reaches a client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RelayError {
    /// The resource host could not be created. Retrying the load may succeed.
    #[error("resource host could not be created: {0}")]
    Creation(String),
    /// The engine failed to load the resource.
    #[error("resource failed to load: {0}")]
    Init(String),
    /// A job failed after the resource was ready.
    #[error("job failed: {0}")]
    Run(String),
    /// A job was submitted with no loaded resource.
    #[error("resource is not ready")]
    NotReady,
    /// A job was submitted while another one is still in flight.
    #[error("another job is already in flight")]
    Busy,
}
