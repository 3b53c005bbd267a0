//! Pending-job correlation.
//!
//! Host results carry no request id: with at most one job in flight the
//! correlation is simply "the one stored reply handle, if any".
//!
//! A job that expired is still running on the host. Until the host reports
//! its terminal result no new job is accepted, so that result can never be
//! mistaken for the next caller's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use llama_relay_types::{ClientReply, RelayError};
use tokio::sync::oneshot;

/// Where the eventual reply for one client request goes.
pub type ReplyHandle = oneshot::Sender<ClientReply>;

/// A job forwarded to the resource host whose reply is still owed.
pub struct PendingRequest {
    pub id: u64,
    reply: ReplyHandle,
    created_at: Instant,
}

impl PendingRequest {
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Outcome of handing a reply to the pending caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Nobody was waiting.
    NoCaller(ClientReply),
    /// The caller went away before the reply arrived.
    CallerGone(ClientReply),
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingRequest>,
    /// Id of an expired job the host has not finished yet.
    expired: Option<u64>,
}

pub struct Correlator {
    slot: Mutex<Slot>,
    next_id: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind `reply` as the pending caller. When a job is pending, or an
    /// expired one is still running on the host, the handle is given back
    /// untouched.
    pub fn register(&self, reply: ReplyHandle) -> Result<u64, ReplyHandle> {
        let mut slot = self.lock();
        if slot.pending.is_some() || slot.expired.is_some() {
            return Err(reply);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        slot.pending = Some(PendingRequest {
            id,
            reply,
            created_at: Instant::now(),
        });
        Ok(id)
    }

    /// Remove the pending request `id` without replying, e.g. when the job
    /// could not be forwarded.
    pub fn withdraw(&self, id: u64) -> Option<ReplyHandle> {
        let mut slot = self.lock();
        if slot.pending.as_ref().is_some_and(|p| p.id == id) {
            slot.pending.take().map(|p| p.reply)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn pending_id(&self) -> Option<u64> {
        self.lock().pending.as_ref().map(|p| p.id)
    }

    /// Whether an expired job is still outstanding on the host.
    pub fn awaiting_expired(&self) -> bool {
        self.lock().expired.is_some()
    }

    pub fn resolve(&self, output: String) -> Delivery {
        let pending = self.take_for_result();
        self.deliver(pending, ClientReply::Output { output })
    }

    pub fn reject(&self, error: RelayError) -> Delivery {
        let pending = self.take_for_result();
        self.deliver(pending, ClientReply::error(error))
    }

    /// Reject the pending request only if it is still `id`. Returns `None`
    /// when that request already completed.
    pub fn expire(&self, id: u64, error: RelayError) -> Option<Delivery> {
        let pending = {
            let mut slot = self.lock();
            if !slot.pending.as_ref().is_some_and(|p| p.id == id) {
                return None;
            }
            slot.expired = Some(id);
            slot.pending.take()
        };
        if let Some(pending) = &pending {
            log::warn!("Pending job #{id} expired after {:?}", pending.age());
        }
        Some(self.deliver(pending, ClientReply::error(error)))
    }

    /// The host is gone; an expired job will never report back.
    pub fn forget_expired(&self) {
        self.lock().expired = None;
    }

    /// A terminal result belongs to the expired job if one is outstanding,
    /// otherwise to the pending caller.
    fn take_for_result(&self) -> Option<PendingRequest> {
        let mut slot = self.lock();
        if let Some(id) = slot.expired.take() {
            log::warn!("Late result for expired job #{id}");
            return None;
        }
        slot.pending.take()
    }

    fn deliver(&self, pending: Option<PendingRequest>, reply: ClientReply) -> Delivery {
        let Some(pending) = pending else {
            log::warn!("Job reply arrived with no pending caller, dropping: {reply:?}");
            return Delivery::NoCaller(reply);
        };
        let id = pending.id;
        let age = pending.age();
        match pending.reply.send(reply) {
            Ok(()) => {
                log::debug!("Delivered reply for job #{id} after {age:?}");
                Delivery::Delivered
            }
            Err(reply) => {
                log::warn!("Caller of job #{id} is gone, reply undelivered");
                Delivery::CallerGone(reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_delivers_and_clears() {
        let correlator = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        correlator.register(tx).unwrap();

        assert_eq!(correlator.resolve("done".to_string()), Delivery::Delivered);
        assert!(!correlator.is_pending());
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::Output {
                output: "done".to_string()
            }
        );
    }

    #[test]
    fn test_second_register_is_refused_and_first_kept() {
        let correlator = Correlator::new();
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, _second_rx) = oneshot::channel();

        let id = correlator.register(first_tx).unwrap();
        assert!(correlator.register(second_tx).is_err());
        assert_eq!(correlator.pending_id(), Some(id));

        correlator.reject(RelayError::Run("boom".to_string()));
        assert_eq!(
            first_rx.try_recv().unwrap(),
            ClientReply::error(RelayError::Run("boom".to_string()))
        );
    }

    #[test]
    fn test_resolve_without_caller_is_not_an_error() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.resolve("late".to_string()),
            Delivery::NoCaller(ClientReply::Output {
                output: "late".to_string()
            })
        );
    }

    #[test]
    fn test_caller_gone_returns_reply() {
        let correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        correlator.register(tx).unwrap();
        drop(rx);

        let delivery = correlator.reject(RelayError::Run("x".to_string()));
        assert!(matches!(delivery, Delivery::CallerGone(ClientReply::Error { .. })));
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_withdraw_only_matching_id() {
        let correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let id = correlator.register(tx).unwrap();

        assert!(correlator.withdraw(id + 1).is_none());
        assert!(correlator.is_pending());
        assert!(correlator.withdraw(id).is_some());
        assert!(!correlator.is_pending());
    }

    #[test]
    fn test_expire_ignores_completed_request() {
        let correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let first = correlator.register(tx).unwrap();
        correlator.resolve("ok".to_string());

        let (tx, mut rx) = oneshot::channel();
        let second = correlator.register(tx).unwrap();
        assert!(correlator
            .expire(first, RelayError::Run("timeout".to_string()))
            .is_none());
        assert_eq!(correlator.pending_id(), Some(second));

        let delivery = correlator.expire(second, RelayError::Run("timeout".to_string()));
        assert_eq!(delivery, Some(Delivery::Delivered));
        assert!(matches!(rx.try_recv().unwrap(), ClientReply::Error { .. }));
    }

    #[test]
    fn test_late_result_of_expired_job_never_reaches_next_caller() {
        let correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let id = correlator.register(tx).unwrap();
        correlator.expire(id, RelayError::Run("timeout".to_string()));
        assert!(correlator.awaiting_expired());

        // The host is still busy with the expired job.
        let (tx, _rx) = oneshot::channel();
        assert!(correlator.register(tx).is_err());

        assert_eq!(
            correlator.resolve("late".to_string()),
            Delivery::NoCaller(ClientReply::Output {
                output: "late".to_string()
            })
        );
        assert!(!correlator.awaiting_expired());

        let (tx, mut rx) = oneshot::channel();
        correlator.register(tx).unwrap();
        assert_eq!(correlator.resolve("fresh".to_string()), Delivery::Delivered);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::Output {
                output: "fresh".to_string()
            }
        );
    }

    #[test]
    fn test_forget_expired_reopens_slot() {
        let correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let id = correlator.register(tx).unwrap();
        correlator.expire(id, RelayError::Run("timeout".to_string()));

        correlator.forget_expired();
        let (tx, _rx) = oneshot::channel();
        assert!(correlator.register(tx).is_ok());
    }
}
