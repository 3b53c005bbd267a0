//! Wire protocol between client, coordinator and resource host.
//!
//! Uses JSON Lines (one JSON object per line): over TCP between client and
//! coordinator, over stdin/stdout between coordinator and resource host.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::status::StatusRecord;

/// Requests a client sends to the coordinator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    /// Liveness probe.
    Ping,
    /// Ask the coordinator to bring the resource up.
    LoadResource,
    /// Run one job against the loaded resource.
    SubmitJob { input: String },
    /// Read the coordinator's live status record.
    GetStatus,
}

/// Replies the coordinator sends for a client request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientReply {
    #[serde(rename = "ok")]
    Pong,
    /// The load was accepted; readiness arrives later as a status event.
    Started,
    Output { output: String },
    Status(StatusRecord),
    Error { error: RelayError },
}

impl ClientReply {
    pub fn error(error: RelayError) -> Self {
        Self::Error { error }
    }
}

/// Unsolicited messages the coordinator broadcasts to every listening client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    StatusChanged(StatusRecord),
    /// One flushed chunk of incremental job output.
    OutputChunk { text: String },
    /// A job reply whose caller was no longer waiting for it.
    UnclaimedResult { reply: ClientReply },
}

/// Request envelope on the client connection. `id` is chosen by the client
/// and echoed in the matching reply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub id: u64,
    pub request: ClientRequest,
}

/// Everything the coordinator writes to a client connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoordinatorFrame {
    Reply { id: u64, reply: ClientReply },
    Event { event: ClientEvent },
}

/// Commands the coordinator sends to the resource host via stdin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostCommand {
    InitResource { resource_locator: String },
    RunJob { input: String },
    /// Graceful shutdown.
    Shutdown,
}

/// Events the resource host reports via stdout. None of them carry a request
/// identifier: at most one job is in flight.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    ResourceReady,
    ResourceProgress { percent: u8 },
    /// Init was requested while a previous init is still running.
    AlreadyInitializing,
    InitError { error: String },
    JobChunk { text: String },
    JobResult { output: String },
    RunError { error: String },
    /// The host's output stream closed. Emitted by the coordinator side of
    /// the link, never by the host itself.
    Exited,
}

/// Serialize a message as a single JSON line (without the trailing newline).
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parse one JSON line into a message.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim())
}
