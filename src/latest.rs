//! The per-project "latest report" pointer.
//!
//! Stored as a small JSON file inside the project directory rather than as a
//! symlink. Replacement writes a temporary file and renames it over the old
//! one, so readers see either the previous or the new pointer, never none.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File name of the pointer inside `{report_root}/{project}`.
pub const LATEST_FILE_NAME: &str = "LATEST";

/// Contents of the pointer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    /// Id of the referenced report, which is also its directory name
    pub id: Uuid,
    /// Completion time of the referenced report
    pub created_at: DateTime<Utc>,
}

fn pointer_path(project_dir: &Path) -> PathBuf {
    project_dir.join(LATEST_FILE_NAME)
}

/// Read the pointer, if any.
///
/// A pointer file that cannot be parsed is treated as absent.
pub async fn read(project_dir: &Path) -> io::Result<Option<LatestPointer>> {
    match tokio::fs::read(pointer_path(project_dir)).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

/// Directory of the report the pointer references, if any.
pub async fn resolve(project_dir: &Path) -> io::Result<Option<PathBuf>> {
    Ok(read(project_dir)
        .await?
        .map(|pointer| project_dir.join(pointer.id.to_string())))
}

/// Point at `candidate` unless the current pointer references a newer report.
///
/// Comparing timestamps makes the update order-independent when two workers
/// finish reports for the same project. Returns whether the pointer moved.
pub async fn advance(project_dir: &Path, candidate: LatestPointer) -> io::Result<bool> {
    if let Some(current) = read(project_dir).await? {
        if current.created_at > candidate.created_at {
            return Ok(false);
        }
    }
    write(project_dir, &candidate).await?;
    Ok(true)
}

/// Replace the pointer unconditionally, or remove it when `pointer` is `None`.
pub async fn replace(project_dir: &Path, pointer: Option<LatestPointer>) -> io::Result<()> {
    match pointer {
        Some(pointer) => write(project_dir, &pointer).await,
        None => match tokio::fs::remove_file(pointer_path(project_dir)).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        },
    }
}

async fn write(project_dir: &Path, pointer: &LatestPointer) -> io::Result<()> {
    tokio::fs::create_dir_all(project_dir).await?;
    let contents = serde_json::to_vec(pointer)?;
    let tmp = project_dir.join(format!(".{LATEST_FILE_NAME}.{}", Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await?;
    if let Err(error) = tokio::fs::rename(&tmp, pointer_path(project_dir)).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn pointer(created_at: DateTime<Utc>) -> LatestPointer {
        LatestPointer {
            id: Uuid::new_v4(),
            created_at,
        }
    }

    #[tokio::test]
    async fn missing_pointer_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read(dir.path()).await.unwrap(), None);
        assert_eq!(resolve(&dir.path().join("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn advance_moves_forward_only() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let older = pointer(now - TimeDelta::seconds(10));
        let newer = pointer(now);

        assert!(advance(dir.path(), newer).await.unwrap());
        assert!(!advance(dir.path(), older).await.unwrap());
        assert_eq!(read(dir.path()).await.unwrap(), Some(newer));
        assert_eq!(
            resolve(dir.path()).await.unwrap(),
            Some(dir.path().join(newer.id.to_string()))
        );
    }

    #[tokio::test]
    async fn replace_with_none_removes_pointer() {
        let dir = tempfile::tempdir().unwrap();
        replace(dir.path(), Some(pointer(Utc::now()))).await.unwrap();
        replace(dir.path(), None).await.unwrap();
        assert_eq!(read(dir.path()).await.unwrap(), None);

        // Removing an absent pointer is not an error
        replace(dir.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn writes_leave_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        advance(dir.path(), pointer(Utc::now())).await.unwrap();
        advance(dir.path(), pointer(Utc::now())).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![LATEST_FILE_NAME]);
    }
}
