//! llama-relay: keep one heavy inference resource alive in a child process and
//! broker stateless clients to it.

pub mod client;
pub mod coordinator;
pub mod logger;

pub use client::{recover_status, ClientError, RelayClient};
pub use coordinator::{Broker, BrokerSettings, HostManager, ProcessManager};
