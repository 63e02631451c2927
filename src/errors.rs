use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Error type for job enqueueing operations
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// Error occurred while serializing job data
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// Database error occurred during enqueueing
    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),
}

/// Errors returned by the report metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No report with the given id exists.
    #[error("report {0} not found")]
    NotFound(Uuid),

    /// A stored row could not be mapped back into a report.
    #[error("corrupt report row: {0}")]
    Corrupt(String),

    /// The underlying database failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// A report directory or pointer file could not be changed.
    #[error("report files: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while unpacking an uploaded archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive's extension does not match a supported format.
    #[error("unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Reading the archive or writing extracted files failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The zip container is malformed.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Unpacking would write more than the configured ceiling.
    #[error("archive expands beyond the limit of {limit} bytes")]
    TooLarge {
        /// Configured ceiling in bytes
        limit: u64,
    },
}

/// Errors raised by the ingestion service.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request carried no archive.
    #[error("file required")]
    MissingFile,

    /// The project name is not a safe path segment.
    #[error("invalid project name: {0:?}")]
    InvalidProject(String),

    /// The archive file name is empty or not a plain file name.
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// The archive's extension does not match a supported format.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// The upload exceeded the configured ceiling.
    #[error("upload exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// The request body stream failed mid-upload.
    #[error("failed to read upload body: {0}")]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Writing to the archive store failed.
    #[error("failed to store archive: {0}")]
    Storage(#[from] std::io::Error),

    /// The job could not be handed to the work queue.
    #[error("failed to enqueue job: {0}")]
    Enqueue(#[from] EnqueueError),
}
