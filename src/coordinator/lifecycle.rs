//! Resource host lifecycle: make sure exactly one host is alive.
//!
//! `ensure_resource_host` is safe to call from any number of concurrent
//! handlers. The first caller that finds no host creates a ticket; everyone
//! else awaits that same ticket and then probes again instead of trusting it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use llama_relay_types::{HostCommand, RelayError};
use tokio::sync::Mutex as TokioMutex;

/// The host-management collaborator: probe, create, and send commands to the
/// resource host.
#[async_trait]
pub trait HostManager: Send + Sync + 'static {
    /// Whether a resource host is currently alive.
    async fn exists(&self) -> bool;

    /// Create a resource host. Only called when `exists` returned false.
    async fn create(&self) -> Result<(), String>;

    /// Send one command. Fails when the host is unreachable; never panics.
    fn dispatch(&self, command: HostCommand) -> Result<(), String>;
}

type Creation = Shared<BoxFuture<'static, Result<(), String>>>;

/// "Creation of the resource host is in progress."
struct CreationTicket {
    generation: u64,
    creation: Creation,
}

pub struct Lifecycle<H: HostManager> {
    host: Arc<H>,
    ticket: TokioMutex<Option<CreationTicket>>,
    next_generation: AtomicU64,
}

impl<H: HostManager> Lifecycle<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            ticket: TokioMutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Return once a resource host is confirmed alive, creating one if needed.
    pub async fn ensure_resource_host(&self) -> Result<(), RelayError> {
        if self.host.exists().await {
            return Ok(());
        }

        let (generation, creation) = {
            let mut slot = self.ticket.lock().await;
            match slot.as_ref() {
                Some(ticket) => {
                    log::debug!("Resource host creation in progress, waiting");
                    (ticket.generation, ticket.creation.clone())
                }
                None => {
                    // Probe again under the slot: a ticket cleared between the
                    // first probe and here means the host was just created.
                    if self.host.exists().await {
                        return Ok(());
                    }
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let host = self.host.clone();
                    let creation = async move { host.create().await }.boxed().shared();
                    log::info!("Creating resource host (ticket #{generation})");
                    *slot = Some(CreationTicket {
                        generation,
                        creation: creation.clone(),
                    });
                    (generation, creation)
                }
            }
        };

        let result = creation.await;
        self.clear_ticket(generation).await;

        if self.host.exists().await {
            return Ok(());
        }
        let cause = match result {
            Err(e) => e,
            Ok(()) => "resource host exited right after creation".to_string(),
        };
        log::error!("Resource host creation failed: {cause}");
        Err(RelayError::Creation(cause))
    }

    /// Clear the ticket if it is still the one this caller awaited.
    async fn clear_ticket(&self, generation: u64) {
        let mut slot = self.ticket.lock().await;
        if slot.as_ref().is_some_and(|t| t.generation == generation) {
            *slot = None;
        }
    }

    pub async fn creation_in_progress(&self) -> bool {
        self.ticket.lock().await.is_some()
    }
}
