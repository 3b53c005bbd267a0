//! Client side of the coordinator connection.
//!
//! A client holds no state between activations: it reconnects, and reads the
//! persisted status record to learn where the resource stands.

use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use llama_relay_db::Database;
use llama_relay_types::{
    decode_line, encode_line, ClientEvent, ClientFrame, ClientReply, ClientRequest,
    CoordinatorFrame, RelayError, ResourceStatus, StatusRecord,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("coordinator closed the connection")]
    Disconnected,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

pub struct RelayClient {
    framed: Framed<TcpStream, LinesCodec>,
    next_id: u64,
}

impl RelayClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new()),
            next_id: 1,
        })
    }

    async fn next_frame(&mut self) -> Result<CoordinatorFrame, ClientError> {
        loop {
            let line = self.framed.next().await.ok_or(ClientError::Disconnected)??;
            if !line.trim().is_empty() {
                return Ok(decode_line(&line)?);
            }
        }
    }

    /// Send one request and wait for its reply. Broadcast events that arrive
    /// in the meantime are handed to `on_event`.
    pub async fn request(
        &mut self,
        request: ClientRequest,
        mut on_event: impl FnMut(&ClientEvent),
    ) -> Result<ClientReply, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        self.framed.send(encode_line(&ClientFrame { id, request })?).await?;

        loop {
            match self.next_frame().await? {
                CoordinatorFrame::Reply { id: reply_id, reply } if reply_id == id => return Ok(reply),
                CoordinatorFrame::Reply { id: other, .. } => {
                    log::warn!("Ignoring reply for unknown request #{other}");
                }
                CoordinatorFrame::Event { event } => on_event(&event),
            }
        }
    }

    /// Wait for the next broadcast event.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            match self.next_frame().await? {
                CoordinatorFrame::Event { event } => return Ok(event),
                CoordinatorFrame::Reply { id, .. } => {
                    log::warn!("Ignoring stray reply #{id}");
                }
            }
        }
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.request(ClientRequest::Ping, |_| {}).await? {
            ClientReply::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&mut self) -> Result<StatusRecord, ClientError> {
        match self.request(ClientRequest::GetStatus, |_| {}).await? {
            ClientReply::Status(record) => Ok(record),
            ClientReply::Error { error } => Err(error.into()),
            other => Err(unexpected(other)),
        }
    }

    /// Request a load and follow status broadcasts until the resource is
    /// ready. A load that settles anywhere else is an `Init` error carrying
    /// the status detail.
    pub async fn load(
        &mut self,
        mut on_status: impl FnMut(&StatusRecord),
    ) -> Result<StatusRecord, ClientError> {
        let mut last: Option<StatusRecord> = None;
        let reply = self
            .request(ClientRequest::LoadResource, |event| {
                if let ClientEvent::StatusChanged(record) = event {
                    on_status(record);
                    last = Some(record.clone());
                }
            })
            .await?;
        match reply {
            ClientReply::Started => {}
            ClientReply::Error { error } => return Err(error.into()),
            other => return Err(unexpected(other)),
        }

        loop {
            if let Some(record) = last.take() {
                if is_settled(&record) {
                    return settle(record);
                }
            }
            if let ClientEvent::StatusChanged(record) = self.next_event().await? {
                on_status(&record);
                last = Some(record);
            }
        }
    }

    /// Run one job, streaming output chunks to `on_chunk`.
    pub async fn submit(
        &mut self,
        input: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, ClientError> {
        let request = ClientRequest::SubmitJob {
            input: input.to_string(),
        };
        let reply = self
            .request(request, |event| {
                if let ClientEvent::OutputChunk { text } = event {
                    on_chunk(text);
                }
            })
            .await?;
        match reply {
            ClientReply::Output { output } => Ok(output),
            ClientReply::Error { error } => Err(error.into()),
            other => Err(unexpected(other)),
        }
    }
}

fn is_settled(record: &StatusRecord) -> bool {
    record.status != ResourceStatus::Loading
}

fn settle(record: StatusRecord) -> Result<StatusRecord, ClientError> {
    match record.status {
        ResourceStatus::Ready => Ok(record),
        _ => {
            let detail = record
                .detail_message
                .unwrap_or_else(|| format!("resource is {}", record.status));
            Err(RelayError::Init(detail).into())
        }
    }
}

fn unexpected(reply: ClientReply) -> ClientError {
    ClientError::UnexpectedReply(format!("{reply:?}"))
}

/// Read the last status the coordinator persisted, without a coordinator.
/// A database that does not exist yet means nothing was ever loaded.
pub fn recover_status(db_path: &str) -> Result<StatusRecord, String> {
    if !Path::new(db_path).exists() {
        return Ok(StatusRecord::not_loaded());
    }
    let db = Database::open_read_only(db_path)?;
    Ok(db.load_status()?.unwrap_or_default())
}
