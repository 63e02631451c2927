#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Archive formats, extraction and results-directory discovery.
pub mod archive;
mod background_job;
/// The external report compiler.
pub mod compiler;
/// Runtime configuration.
pub mod config;
/// Error types.
pub mod errors;
/// Upload intake.
pub mod ingest;
mod job_registry;
/// The latest-report pointer file.
pub mod latest;
/// Per-project mutual exclusion.
pub mod locks;
/// Report metadata persistence.
pub mod metadata;
/// The report generation job.
pub mod pipeline;
/// Report directories and the operations that keep them consistent.
pub mod reports;
/// Counting result files.
pub mod results;
/// Per-project report retention.
pub mod retention;
mod runner;
/// Database schema definitions.
pub mod schema;
/// HTTP API.
pub mod server;
mod storage;
mod util;
mod worker;

/// The main trait for defining background jobs.
pub use self::background_job::BackgroundJob;
/// Error type for job enqueueing operations.
pub use self::errors::EnqueueError;
/// The main runner that orchestrates job processing.
pub use self::runner::{Configured, Queue, RunHandle, Runner, Unconfigured};
/// Database connection and queue inspection.
pub use self::storage::{connect, pending_job_count, setup_database};
