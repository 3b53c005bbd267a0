//! TCP front end: one JSON line per frame in each direction.
//!
//! Each connection gets a writer task and a forwarder that owns the order of
//! outgoing frames. Requests are handled on detached tasks so a disconnect
//! never interrupts a half-done load; only the per-request reply waiters are
//! aborted with the connection.
//!
//! Job chunks are broadcast before the job's reply is sent, so the forwarder
//! drains queued events ahead of every reply it writes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use llama_relay_types::{decode_line, encode_line, ClientEvent, ClientFrame, ClientReply, CoordinatorFrame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec};

use super::broker::Broker;
use super::lifecycle::HostManager;

pub static ACTIVE_CONNECTIONS: AtomicU32 = AtomicU32::new(0);

/// Longest accepted request line.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Accept connections until the listener fails.
pub async fn serve<H: HostManager>(listener: TcpListener, broker: Arc<Broker<H>>) -> std::io::Result<()> {
    log::info!("Coordinator listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        log::debug!("Accepted connection from {peer}");
        tokio::spawn(handle_connection(stream, broker.clone()));
    }
}

pub async fn handle_connection<H: HostManager>(stream: TcpStream, broker: Arc<Broker<H>>) {
    let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    log::info!("Client connected ({count} active)");

    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut lines) = framed.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<CoordinatorFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let line = match encode_line(&frame) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Failed to encode frame: {e}");
                    continue;
                }
            };
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let (replies_tx, replies_rx) = mpsc::unbounded_channel::<(u64, ClientReply)>();
    let forwarder = tokio::spawn(forward_frames(broker.subscribe(), replies_rx, out_tx.clone()));
    let mut waiters = JoinSet::new();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            Err(e) => {
                log::warn!("Client stream error: {e}");
                break;
            }
        };
        let ClientFrame { id, request } = match decode_line(&line) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Ignoring malformed client frame: {e}");
                continue;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let handler = broker.clone();
        tokio::spawn(async move { handler.handle_request(request, reply_tx).await });

        let replies = replies_tx.clone();
        waiters.spawn(async move {
            if let Ok(reply) = reply_rx.await {
                let _ = replies.send((id, reply));
            }
        });
        // Reap finished waiters so a long session does not accumulate them.
        while waiters.try_join_next().is_some() {}
    }

    // Dropping the waiters drops their reply receivers, so an outstanding job
    // result falls back to broadcast.
    waiters.abort_all();
    drop(replies_tx);
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;

    let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    log::info!("Client disconnected ({count} active)");
}

async fn forward_frames(
    mut events: broadcast::Receiver<ClientEvent>,
    mut replies: mpsc::UnboundedReceiver<(u64, ClientReply)>,
    out_tx: mpsc::UnboundedSender<CoordinatorFrame>,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            event = events.recv(), if events_open => match event {
                Ok(event) => {
                    if out_tx.send(CoordinatorFrame::Event { event }).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Client fell behind, skipped {skipped} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            reply = replies.recv() => {
                let Some((id, reply)) = reply else { break };
                if events_open && !drain_events(&mut events, &out_tx) {
                    break;
                }
                if out_tx.send(CoordinatorFrame::Reply { id, reply }).is_err() {
                    break;
                }
            }
        }
    }
}

/// Forward every event already queued. Returns false once the writer is gone.
fn drain_events(events: &mut broadcast::Receiver<ClientEvent>, out_tx: &mpsc::UnboundedSender<CoordinatorFrame>) -> bool {
    loop {
        match events.try_recv() {
            Ok(event) => {
                if out_tx.send(CoordinatorFrame::Event { event }).is_err() {
                    return false;
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                log::warn!("Client fell behind, skipped {skipped} event(s)");
            }
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => return true,
        }
    }
}
