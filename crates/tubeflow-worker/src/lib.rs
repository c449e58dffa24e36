//! Video lifecycle worker.
//!
//! This crate provides:
//! - The job orchestrator driving ingest, processing, generation and publish
//! - The cleanup scheduler and its sweep loop
//! - Bounded background execution with graceful drain
//! - Retry helpers and structured per-job logging

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cleanup::{CleanupScheduler, SweepReport};
pub use config::WorkerConfig;
pub use context::{PipelineContext, Services};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use orchestrator::Orchestrator;
pub use retry::RetryConfig;
pub use runner::TaskRunner;
