//! Message broker: the coordinator's single entry point.
//!
//! Client requests and host events both land here. The broker owns the live
//! status record and is its only writer; every transition is persisted and
//! broadcast while the status lock is held, so observers see transitions in
//! the order they happened.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use llama_relay_db::SharedDatabase;
use llama_relay_types::{
    ClientEvent, ClientReply, ClientRequest, HostCommand, HostEvent, RelayError, ResourceStatus,
    StatusRecord,
};
use tokio::sync::{broadcast, mpsc};

use super::correlator::{Correlator, Delivery, ReplyHandle};
use super::lifecycle::{HostManager, Lifecycle};
use super::notifier::Notifier;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub resource_locator: String,
    /// Reject a pending job after this long. `None` waits forever.
    pub job_timeout: Option<Duration>,
}

pub struct Broker<H: HostManager> {
    lifecycle: Lifecycle<H>,
    correlator: Arc<Correlator>,
    notifier: Notifier,
    db: SharedDatabase,
    status: Mutex<StatusRecord>,
    settings: BrokerSettings,
}

impl<H: HostManager> Broker<H> {
    /// Build a broker around the persisted status, creating the record on
    /// first activation.
    pub fn new(host: Arc<H>, db: SharedDatabase, settings: BrokerSettings) -> Result<Self, String> {
        let status = db.ensure_status()?;
        log::info!("Broker starting with persisted status {}", status.status);
        Ok(Self {
            lifecycle: Lifecycle::new(host),
            correlator: Arc::new(Correlator::new()),
            notifier: Notifier::new(),
            db,
            status: Mutex::new(status),
            settings,
        })
    }

    pub fn status(&self) -> StatusRecord {
        self.lock_status().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.notifier.subscribe()
    }

    /// Whether a forwarded job is still waiting for its result.
    pub fn has_pending_job(&self) -> bool {
        self.correlator.is_pending()
    }

    fn host(&self) -> &Arc<H> {
        self.lifecycle.host()
    }

    fn lock_status(&self) -> MutexGuard<'_, StatusRecord> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop a persisted `Loading`/`Ready` left behind by a previous
    /// coordinator whose host is gone.
    pub async fn reconcile(&self) {
        if self.host().exists().await {
            return;
        }
        let mut status = self.lock_status();
        if matches!(status.status, ResourceStatus::Loading | ResourceStatus::Ready) {
            log::warn!(
                "Persisted status is {} but no resource host is running, resetting",
                status.status
            );
            self.apply(&mut status, StatusRecord::not_loaded_because("resource host not running"));
        }
    }

    /// Handle one client request. Synchronous outcomes are sent on `reply`
    /// before returning; a forwarded job keeps `reply` until its result.
    pub async fn handle_request(&self, request: ClientRequest, reply: ReplyHandle) {
        match request {
            ClientRequest::Ping => send_reply(reply, ClientReply::Pong),
            ClientRequest::GetStatus => send_reply(reply, ClientReply::Status(self.status())),
            ClientRequest::LoadResource => {
                let outcome = match self.handle_load().await {
                    Ok(()) => ClientReply::Started,
                    Err(e) => ClientReply::error(e),
                };
                send_reply(reply, outcome);
            }
            ClientRequest::SubmitJob { input } => self.handle_submit(input, reply).await,
        }
    }

    async fn handle_load(&self) -> Result<(), RelayError> {
        let host_alive = self.host().exists().await;
        {
            let mut status = self.lock_status();
            match status.status {
                ResourceStatus::Ready if host_alive => {
                    log::info!("Resource already loaded, skipping init");
                    self.notifier
                        .broadcast(ClientEvent::StatusChanged(status.clone()));
                    return Ok(());
                }
                ResourceStatus::Loading => {
                    log::info!("Resource load already in progress");
                    return Ok(());
                }
                ResourceStatus::Ready
                | ResourceStatus::NotLoaded
                | ResourceStatus::Failed => {
                    self.apply(&mut status, StatusRecord::loading(0));
                }
            }
        }

        if let Err(e) = self.lifecycle.ensure_resource_host().await {
            self.transition(StatusRecord::failed(e.to_string()));
            return Err(e);
        }

        let command = HostCommand::InitResource {
            resource_locator: self.settings.resource_locator.clone(),
        };
        if let Err(e) = self.host().dispatch(command) {
            let error = RelayError::Creation(format!("resource host unreachable: {e}"));
            self.transition(StatusRecord::failed(error.to_string()));
            return Err(error);
        }
        log::info!("Requested load of {}", self.settings.resource_locator);
        Ok(())
    }

    async fn handle_submit(&self, input: String, reply: ReplyHandle) {
        if !self.status().is_ready() || !self.host().exists().await {
            log::warn!("Job rejected: resource not ready");
            send_reply(reply, ClientReply::error(RelayError::NotReady));
            return;
        }

        let id = match self.correlator.register(reply) {
            Ok(id) => id,
            Err(reply) => {
                log::warn!("Job rejected: another job is pending");
                send_reply(reply, ClientReply::error(RelayError::Busy));
                return;
            }
        };

        if let Err(e) = self.host().dispatch(HostCommand::RunJob { input }) {
            log::error!("Failed to forward job #{id}: {e}");
            if let Some(reply) = self.correlator.withdraw(id) {
                send_reply(
                    reply,
                    ClientReply::error(RelayError::Run(format!("resource host unreachable: {e}"))),
                );
            }
            return;
        }
        log::info!("Forwarded job #{id}");

        if let Some(timeout) = self.settings.job_timeout {
            let correlator = self.correlator.clone();
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let error = RelayError::Run(format!("job timed out after {timeout:?}"));
                if let Some(delivery) = correlator.expire(id, error) {
                    publish_undelivered(&notifier, delivery);
                }
            });
        }
    }

    /// Handle one event from the resource host, in emission order.
    pub fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::JobChunk { text } => {
                self.notifier.broadcast(ClientEvent::OutputChunk { text });
            }
            HostEvent::JobResult { output } => {
                publish_undelivered(&self.notifier, self.correlator.resolve(output));
            }
            HostEvent::RunError { error } => {
                log::warn!("Job failed: {error}");
                publish_undelivered(&self.notifier, self.correlator.reject(RelayError::Run(error)));
            }
            HostEvent::Exited => {
                log::warn!("Resource host exited");
                if self.correlator.is_pending() {
                    let delivery = self
                        .correlator
                        .reject(RelayError::Run("resource host exited".to_string()));
                    publish_undelivered(&self.notifier, delivery);
                }
                self.correlator.forget_expired();
                self.apply_host_event(&event);
            }
            HostEvent::InitError { ref error } => {
                log::error!("Resource failed to load: {error}");
                self.apply_host_event(&event);
            }
            HostEvent::ResourceReady
            | HostEvent::ResourceProgress { .. }
            | HostEvent::AlreadyInitializing => self.apply_host_event(&event),
        }
    }

    /// Drain host events until the channel closes.
    pub async fn run_event_pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_host_event(event);
        }
        log::info!("Host event channel closed, event pump stopping");
    }

    /// Ask a running host to exit gracefully.
    pub async fn shutdown(&self) {
        if self.host().exists().await {
            if let Err(e) = self.host().dispatch(HostCommand::Shutdown) {
                log::warn!("Failed to send shutdown to resource host: {e}");
            }
        }
    }

    fn apply_host_event(&self, event: &HostEvent) {
        let mut status = self.lock_status();
        match status.on_host_event(event) {
            Some(next) => self.apply(&mut status, next),
            None => log::debug!("Ignoring {event:?} while {}", status.status),
        }
    }

    fn transition(&self, next: StatusRecord) {
        let mut status = self.lock_status();
        self.apply(&mut status, next);
    }

    /// Persist then broadcast `next`. Called with the status lock held.
    fn apply(&self, status: &mut StatusRecord, next: StatusRecord) {
        if status.status != next.status {
            log::info!("Resource status {} -> {}", status.status, next.status);
        }
        if let Err(e) = self.db.save_status(&next) {
            log::error!("Failed to persist status: {e}");
        }
        *status = next;
        self.notifier
            .broadcast(ClientEvent::StatusChanged(status.clone()));
    }
}

fn send_reply(reply: ReplyHandle, message: ClientReply) {
    if reply.send(message).is_err() {
        log::warn!("Reply channel closed, caller is gone");
    }
}

/// Fall back to broadcast for a job reply nobody claimed.
fn publish_undelivered(notifier: &Notifier, delivery: Delivery) {
    match delivery {
        Delivery::Delivered => {}
        Delivery::NoCaller(reply) | Delivery::CallerGone(reply) => {
            notifier.broadcast(ClientEvent::UnclaimedResult { reply });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::lifecycle::tests::RecordingHost;
    use llama_relay_db::Database;
    use std::sync::atomic::Ordering;
    use tokio::sync::oneshot;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            resource_locator: "echo://test".to_string(),
            job_timeout: None,
        }
    }

    fn broker_with(host: RecordingHost, settings: BrokerSettings) -> (Broker<RecordingHost>, Arc<RecordingHost>) {
        let host = Arc::new(host);
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broker = Broker::new(host.clone(), db, settings).unwrap();
        (broker, host)
    }

    async fn request(broker: &Broker<RecordingHost>, request: ClientRequest) -> oneshot::Receiver<ClientReply> {
        let (tx, rx) = oneshot::channel();
        broker.handle_request(request, tx).await;
        rx
    }

    async fn make_ready(broker: &Broker<RecordingHost>) {
        let mut rx = request(broker, ClientRequest::LoadResource).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        broker.handle_host_event(HostEvent::ResourceReady);
        assert!(broker.status().is_ready());
    }

    fn submit(input: &str) -> ClientRequest {
        ClientRequest::SubmitJob {
            input: input.to_string(),
        }
    }

    fn init_count(host: &RecordingHost) -> usize {
        host.commands()
            .iter()
            .filter(|c| matches!(c, HostCommand::InitResource { .. }))
            .count()
    }

    fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_ping() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        let mut rx = request(&broker, ClientRequest::Ping).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Pong);
        assert_eq!(host.creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_activation_is_not_loaded() {
        let (broker, _host) = broker_with(RecordingHost::default(), settings());
        let mut rx = request(&broker, ClientRequest::GetStatus).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::Status(StatusRecord::not_loaded())
        );
    }

    #[tokio::test]
    async fn test_load_progress_ready_scenario() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        let mut events = broker.subscribe();

        let mut rx = request(&broker, ClientRequest::LoadResource).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        assert_eq!(host.creations.load(Ordering::SeqCst), 1);
        assert_eq!(
            host.commands(),
            vec![HostCommand::InitResource {
                resource_locator: "echo://test".to_string()
            }]
        );

        broker.handle_host_event(HostEvent::ResourceProgress { percent: 40 });
        broker.handle_host_event(HostEvent::ResourceProgress { percent: 90 });
        broker.handle_host_event(HostEvent::ResourceReady);

        assert_eq!(
            drain(&mut events),
            vec![
                ClientEvent::StatusChanged(StatusRecord::loading(0)),
                ClientEvent::StatusChanged(StatusRecord::loading(40)),
                ClientEvent::StatusChanged(StatusRecord::loading(90)),
                ClientEvent::StatusChanged(StatusRecord::ready()),
            ]
        );
        assert_eq!(broker.db.load_status().unwrap(), Some(StatusRecord::ready()));
    }

    #[tokio::test]
    async fn test_repeated_load_while_loading_dispatches_once() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());

        let (a, b) = tokio::join!(
            request(&broker, ClientRequest::LoadResource),
            request(&broker, ClientRequest::LoadResource)
        );
        let mut c = request(&broker, ClientRequest::LoadResource).await;
        for mut rx in [a, b] {
            assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        }
        assert_eq!(c.try_recv().unwrap(), ClientReply::Started);

        assert_eq!(init_count(&host), 1);
        assert_eq!(host.creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_when_ready_short_circuits() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;
        let mut events = broker.subscribe();

        let mut rx = request(&broker, ClientRequest::LoadResource).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        assert_eq!(init_count(&host), 1);
        assert_eq!(
            drain(&mut events),
            vec![ClientEvent::StatusChanged(StatusRecord::ready())]
        );
    }

    #[tokio::test]
    async fn test_load_when_ready_but_host_gone_reloads() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;
        host.kill();

        let mut rx = request(&broker, ClientRequest::LoadResource).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        assert_eq!(host.creations.load(Ordering::SeqCst), 2);
        assert_eq!(init_count(&host), 2);
        assert_eq!(broker.status().status, ResourceStatus::Loading);
    }

    #[tokio::test]
    async fn test_creation_failure_marks_failed() {
        let host = RecordingHost::default();
        host.fail_creations.store(1, Ordering::SeqCst);
        let (broker, host) = broker_with(host, settings());

        let mut rx = request(&broker, ClientRequest::LoadResource).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::error(RelayError::Creation("spawn failed".to_string()))
        );
        assert_eq!(broker.status().status, ResourceStatus::Failed);
        assert!(host.commands().is_empty());

        // Retrying from Failed is a fresh attempt.
        let mut rx = request(&broker, ClientRequest::LoadResource).await;
        assert_eq!(rx.try_recv().unwrap(), ClientReply::Started);
        assert_eq!(broker.status().status, ResourceStatus::Loading);
        assert_eq!(init_count(&host), 1);
    }

    #[tokio::test]
    async fn test_init_error_then_already_initializing() {
        let (broker, _host) = broker_with(RecordingHost::default(), settings());
        request(&broker, ClientRequest::LoadResource).await;

        broker.handle_host_event(HostEvent::InitError {
            error: "resource not found".to_string(),
        });
        assert_eq!(broker.status(), StatusRecord::failed("resource not found"));

        broker.handle_host_event(HostEvent::AlreadyInitializing);
        assert_eq!(broker.status().status, ResourceStatus::Loading);
    }

    #[tokio::test]
    async fn test_submit_while_not_loaded_is_not_ready() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        let mut rx = request(&broker, submit("hello")).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::error(RelayError::NotReady)
        );
        assert!(host.commands().is_empty());
        assert_eq!(host.creations.load(Ordering::SeqCst), 0);
        assert_eq!(broker.status(), StatusRecord::not_loaded());
    }

    #[tokio::test]
    async fn test_job_result_resolves_caller() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;
        let mut events = broker.subscribe();

        let mut rx = request(&broker, submit("hello")).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            host.commands().last(),
            Some(&HostCommand::RunJob {
                input: "hello".to_string()
            })
        );

        broker.handle_host_event(HostEvent::JobChunk {
            text: "Echo: ".to_string(),
        });
        broker.handle_host_event(HostEvent::JobResult {
            output: "Echo: hello".to_string(),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::Output {
                output: "Echo: hello".to_string()
            }
        );
        assert_eq!(
            drain(&mut events),
            vec![ClientEvent::OutputChunk {
                text: "Echo: ".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_second_job_is_busy_and_first_keeps_binding() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;

        let mut first = request(&broker, submit("one")).await;
        let mut second = request(&broker, submit("two")).await;
        assert_eq!(
            second.try_recv().unwrap(),
            ClientReply::error(RelayError::Busy)
        );
        let run_jobs = host
            .commands()
            .iter()
            .filter(|c| matches!(c, HostCommand::RunJob { .. }))
            .count();
        assert_eq!(run_jobs, 1);

        broker.handle_host_event(HostEvent::JobResult {
            output: "Echo: one".to_string(),
        });
        assert_eq!(
            first.try_recv().unwrap(),
            ClientReply::Output {
                output: "Echo: one".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_run_error_keeps_ready() {
        let (broker, _host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;

        let mut rx = request(&broker, submit("  ")).await;
        broker.handle_host_event(HostEvent::RunError {
            error: "empty input".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::error(RelayError::Run("empty input".to_string()))
        );
        assert!(broker.status().is_ready());
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_nothing_pending() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;
        host.unreachable.store(true, Ordering::SeqCst);

        let mut rx = request(&broker, submit("hello")).await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            ClientReply::Error {
                error: RelayError::Run(_)
            }
        ));
        assert!(!broker.correlator.is_pending());

        host.unreachable.store(false, Ordering::SeqCst);
        let mut rx = request(&broker, submit("again")).await;
        assert!(rx.try_recv().is_err());
        assert!(broker.correlator.is_pending());
    }

    #[tokio::test]
    async fn test_unclaimed_result_is_broadcast() {
        let (broker, _host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;
        let mut events = broker.subscribe();

        let rx = request(&broker, submit("hello")).await;
        drop(rx);
        broker.handle_host_event(HostEvent::JobResult {
            output: "Echo: hello".to_string(),
        });

        assert_eq!(
            drain(&mut events),
            vec![ClientEvent::UnclaimedResult {
                reply: ClientReply::Output {
                    output: "Echo: hello".to_string()
                }
            }]
        );
    }

    #[tokio::test]
    async fn test_host_exit_rejects_pending_and_resets() {
        let (broker, host) = broker_with(RecordingHost::default(), settings());
        make_ready(&broker).await;

        let mut rx = request(&broker, submit("hello")).await;
        host.kill();
        broker.handle_host_event(HostEvent::Exited);

        assert_eq!(
            rx.try_recv().unwrap(),
            ClientReply::error(RelayError::Run("resource host exited".to_string()))
        );
        assert_eq!(broker.status().status, ResourceStatus::NotLoaded);
        assert!(!broker.correlator.is_pending());
    }

    #[tokio::test]
    async fn test_job_timeout_rejects_pending() {
        let mut settings = settings();
        settings.job_timeout = Some(Duration::from_millis(20));
        let (broker, _host) = broker_with(RecordingHost::default(), settings);
        make_ready(&broker).await;

        let rx = request(&broker, submit("slow")).await;
        let reply = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            reply,
            ClientReply::Error {
                error: RelayError::Run(_)
            }
        ));
        assert!(!broker.correlator.is_pending());
        assert!(broker.status().is_ready());
    }

    #[tokio::test]
    async fn test_late_result_after_timeout_is_unclaimed() {
        let mut settings = settings();
        settings.job_timeout = Some(Duration::from_millis(20));
        let (broker, host) = broker_with(RecordingHost::default(), settings);
        make_ready(&broker).await;

        let rx = request(&broker, submit("slow")).await;
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();

        // The host is still working on the expired job.
        let mut refused = request(&broker, submit("next")).await;
        assert_eq!(
            refused.try_recv().unwrap(),
            ClientReply::error(RelayError::Busy)
        );

        let mut events = broker.subscribe();
        broker.handle_host_event(HostEvent::JobResult {
            output: "Echo: slow".to_string(),
        });
        assert_eq!(
            drain(&mut events),
            vec![ClientEvent::UnclaimedResult {
                reply: ClientReply::Output {
                    output: "Echo: slow".to_string()
                }
            }]
        );

        let mut next = request(&broker, submit("next")).await;
        assert!(next.try_recv().is_err());
        broker.handle_host_event(HostEvent::JobResult {
            output: "Echo: next".to_string(),
        });
        assert_eq!(
            next.try_recv().unwrap(),
            ClientReply::Output {
                output: "Echo: next".to_string()
            }
        );
        let run_jobs = host
            .commands()
            .iter()
            .filter(|c| matches!(c, HostCommand::RunJob { .. }))
            .count();
        assert_eq!(run_jobs, 2);
    }

    #[tokio::test]
    async fn test_host_exit_forgets_expired_job() {
        let mut settings = settings();
        settings.job_timeout = Some(Duration::from_millis(20));
        let (broker, host) = broker_with(RecordingHost::default(), settings);
        make_ready(&broker).await;

        let rx = request(&broker, submit("slow")).await;
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        host.kill();
        broker.handle_host_event(HostEvent::Exited);
        assert!(!broker.correlator.awaiting_expired());

        make_ready(&broker).await;
        let mut rx = request(&broker, submit("again")).await;
        assert!(rx.try_recv().is_err());
        assert!(broker.has_pending_job());
    }

    #[tokio::test]
    async fn test_reconcile_resets_stale_ready() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_status(&StatusRecord::ready()).unwrap();
        let host = Arc::new(RecordingHost::default());
        let broker = Broker::new(host, db.clone(), settings()).unwrap();
        assert!(broker.status().is_ready());

        broker.reconcile().await;
        assert_eq!(
            db.load_status().unwrap(),
            Some(StatusRecord::not_loaded_because("resource host not running"))
        );
    }

    #[tokio::test]
    async fn test_reconcile_keeps_status_when_host_alive() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.save_status(&StatusRecord::ready()).unwrap();
        let broker = Broker::new(Arc::new(RecordingHost::alive()), db, settings()).unwrap();

        broker.reconcile().await;
        assert!(broker.status().is_ready());
    }

    #[tokio::test]
    async fn test_status_survives_client_restart() {
        let path = std::env::temp_dir()
            .join(format!("llama_relay_broker_{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        {
            let db = Arc::new(Database::new(&path).unwrap());
            let broker = Broker::new(Arc::new(RecordingHost::default()), db, settings()).unwrap();
            request(&broker, ClientRequest::LoadResource).await;
            broker.handle_host_event(HostEvent::ResourceProgress { percent: 40 });

            // A fresh client reads the last written record, not NotLoaded.
            let client_view = Database::open_read_only(&path).unwrap();
            assert_eq!(client_view.load_status().unwrap(), Some(StatusRecord::loading(40)));

            broker.handle_host_event(HostEvent::ResourceReady);
        }
        let client_view = Database::open_read_only(&path).unwrap();
        assert_eq!(client_view.load_status().unwrap(), Some(StatusRecord::ready()));
        drop(client_view);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_event_pump_preserves_order() {
        let (broker, _host) = broker_with(RecordingHost::default(), settings());
        let broker = Arc::new(broker);
        request(&broker, ClientRequest::LoadResource).await;

        let (tx, rx) = mpsc::unbounded_channel();
        for percent in [10, 20, 30] {
            tx.send(HostEvent::ResourceProgress { percent }).unwrap();
        }
        tx.send(HostEvent::ResourceReady).unwrap();
        drop(tx);

        broker.clone().run_event_pump(rx).await;
        assert!(broker.status().is_ready());
    }
}
