//! Coordinator: the long-lived process that brokers between clients and the
//! resource host.

pub mod broker;
pub mod correlator;
pub mod lifecycle;
pub mod notifier;
pub mod process_manager;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use llama_relay_db::{RelayConfig, SharedDatabase};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub use broker::{Broker, BrokerSettings};
pub use correlator::{Correlator, Delivery, PendingRequest, ReplyHandle};
pub use lifecycle::{HostManager, Lifecycle};
pub use notifier::Notifier;
pub use process_manager::{HostCommandLine, ProcessManager};

impl From<&RelayConfig> for BrokerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            resource_locator: config.resource_locator.clone(),
            job_timeout: config.job_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Run the coordinator until ctrl-c: broker, event pump and TCP server over
/// a child-process resource host.
pub async fn run(db: SharedDatabase, db_path: &str, config: RelayConfig) -> Result<(), String> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let host = Arc::new(ProcessManager::new(HostCommandLine::current_exe(db_path)?, events_tx));
    let broker = Arc::new(Broker::new(host.clone(), db, BrokerSettings::from(&config))?);
    broker.reconcile().await;

    let pump = tokio::spawn(broker.clone().run_event_pump(events_rx));
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {e}", config.listen_addr))?;

    let outcome = tokio::select! {
        result = server::serve(listener, broker.clone()) => {
            result.map_err(|e| format!("Server error: {e}"))
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown requested");
            Ok(())
        }
    };

    broker.shutdown().await;
    // Give the host a moment to exit on its own before the kill on drop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    host.kill();
    pump.abort();
    outcome
}
