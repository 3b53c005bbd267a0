//! Best-effort broadcast to every listening client.

use llama_relay_types::ClientEvent;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Send to all current listeners. Returns whether anyone received it;
    /// having no listener is normal and never an error.
    pub fn broadcast(&self, event: ClientEvent) -> bool {
        match self.tx.send(event) {
            Ok(n) => {
                log::debug!("Broadcast event to {n} listener(s)");
                true
            }
            Err(broadcast::error::SendError(event)) => {
                log::debug!("No listeners for event {event:?}");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
