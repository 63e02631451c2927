//! The upload intake: stage an archive, move it into the archive store and
//! enqueue a job for it.

use crate::BackgroundJob;
use crate::archive::ArchiveFormat;
use crate::errors::IngestError;
use crate::pipeline::GenerateReport;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Project used when an upload does not name one.
pub const DEFAULT_PROJECT: &str = "demo";

/// Default upload ceiling: 20 GiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024 * 1024;

const STAGING_DIR_NAME: &str = ".incoming";
const MAX_PROJECT_LEN: usize = 128;

/// Validate a project name, substituting [`DEFAULT_PROJECT`] when absent or blank.
///
/// Project names become directory names, so only `[A-Za-z0-9._-]` is
/// allowed and the first character must be alphanumeric.
pub fn normalize_project(project: Option<&str>) -> Result<String, IngestError> {
    let project = project.map(str::trim).unwrap_or_default();
    if project.is_empty() {
        return Ok(DEFAULT_PROJECT.to_string());
    }

    let mut chars = project.chars();
    let valid = project.len() <= MAX_PROJECT_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(project.to_string())
    } else {
        Err(IngestError::InvalidProject(project.to_string()))
    }
}

fn sanitize_file_name(file_name: &str) -> Result<String, IngestError> {
    let invalid = || IngestError::InvalidFileName(file_name.to_string());
    // Browsers on Windows may send full paths
    let base = file_name.rsplit(['/', '\\']).next().ok_or_else(invalid)?;
    if base.is_empty() || base == "." || base == ".." || base.starts_with('.') {
        return Err(invalid());
    }
    Ok(base.to_string())
}

/// An archive written to the staging area but not yet visible to workers.
///
/// Dropping it without [`Ingestor::commit`] removes the staged file.
#[derive(Debug)]
pub struct StagedArchive {
    id: Uuid,
    file_name: String,
    path: PathBuf,
    size: u64,
    committed: bool,
}

impl Drop for StagedArchive {
    fn drop(&mut self) {
        if !self.committed {
            // Blocking, but a single unlink; the file must be gone before the
            // rejected request is answered
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Accepts uploads into the archive store and hands them to the work queue.
#[derive(Debug, Clone)]
pub struct Ingestor {
    upload_root: PathBuf,
    queue: SqlitePool,
    max_upload_bytes: u64,
}

impl Ingestor {
    /// An ingestor writing below `upload_root` and enqueueing into `queue`.
    pub fn new(upload_root: impl Into<PathBuf>, queue: SqlitePool) -> Self {
        Self {
            upload_root: upload_root.into(),
            queue,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Set the upload ceiling in bytes.
    pub fn max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Where the archive of job `id` lives once committed.
    pub fn archive_path(&self, project: &str, id: Uuid, file_name: &str) -> PathBuf {
        self.upload_root
            .join(project)
            .join(id.to_string())
            .join(file_name)
    }

    /// Stage, commit and enqueue in one call.
    pub async fn accept<S, E>(
        &self,
        project: Option<&str>,
        file_name: &str,
        body: S,
    ) -> Result<Uuid, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let project = normalize_project(project)?;
        let staged = self.stage(file_name, body).await?;
        self.commit(staged, Some(&project)).await
    }

    /// Stream an upload into the staging area.
    ///
    /// The format is checked before anything is written, and the stream is
    /// abandoned as soon as it exceeds the upload ceiling.
    pub async fn stage<S, E>(&self, file_name: &str, body: S) -> Result<StagedArchive, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let file_name = sanitize_file_name(file_name)?;
        if ArchiveFormat::detect(&file_name).is_none() {
            return Err(IngestError::UnsupportedFormat(file_name));
        }

        let id = Uuid::new_v4();
        let staging_dir = self.upload_root.join(STAGING_DIR_NAME);
        tokio::fs::create_dir_all(&staging_dir).await?;

        let mut staged = StagedArchive {
            id,
            file_name,
            path: staging_dir.join(format!("{id}.partial")),
            size: 0,
            committed: false,
        };

        let mut file = tokio::fs::File::create(&staged.path).await?;
        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| IngestError::Body(Box::new(error)))?;
            staged.size += chunk.len() as u64;
            if staged.size > self.max_upload_bytes {
                warn!(upload.id = %id, limit = self.max_upload_bytes, "Upload exceeds the size limit");
                return Err(IngestError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(upload.id = %id, size = staged.size, "Staged upload");
        Ok(staged)
    }

    /// Move a staged archive into the archive store and enqueue its job.
    ///
    /// The archive is complete on disk before the job exists; if enqueueing
    /// fails the archive is removed again.
    pub async fn commit(
        &self,
        mut staged: StagedArchive,
        project: Option<&str>,
    ) -> Result<Uuid, IngestError> {
        let project = normalize_project(project)?;
        let id = staged.id;
        let archive_path = self.archive_path(&project, id, &staged.file_name);
        let job_dir = archive_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.upload_root.clone());

        tokio::fs::create_dir_all(&job_dir).await?;
        tokio::fs::rename(&staged.path, &archive_path).await?;
        staged.committed = true;

        let job = GenerateReport {
            id,
            project: project.clone(),
            archive_path,
        };
        if let Err(error) = job.enqueue(&self.queue).await {
            warn!(upload.id = %id, %error, "Failed to enqueue job, discarding archive");
            let _ = tokio::fs::remove_dir_all(&job_dir).await;
            return Err(error.into());
        }

        info!(job.id = %id, %project, size = staged.size, "Accepted upload");
        Ok(id)
    }
}
