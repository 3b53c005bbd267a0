//! Resource host.
//!
//! The engine lives in a separate child process for:
//! - Memory reclaim: kill the process to free everything the session holds
//! - Crash isolation: an engine crash doesn't take the coordinator down

pub mod engine;
pub mod output_buffer;
pub mod worker_main;

pub use engine::{EchoEngine, InferenceEngine};
pub use output_buffer::{BoundaryRule, OutputChunkBuffer};
pub use worker_main::run_worker;
