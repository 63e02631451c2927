//! Report directories on disk and the operations that keep them in step
//! with the metadata store.

use crate::errors::StoreError;
use crate::latest::{self, LatestPointer};
use crate::locks::ProjectLocks;
use crate::metadata::ReportStore;
use crate::retention::RetentionPolicy;
use crate::schema::Report;
use std::io;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Layout of `{report_root}/{project}/{id}`.
#[derive(Debug, Clone)]
pub struct ReportTree {
    root: PathBuf,
}

impl ReportTree {
    /// A tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{project}`, which also holds the latest pointer.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    /// `{root}/{project}/{id}`.
    pub fn report_dir(&self, project: &str, id: Uuid) -> PathBuf {
        self.project_dir(project).join(id.to_string())
    }

    /// Remove a report directory. A directory that is already gone is fine.
    pub async fn remove_report_dir(&self, project: &str, id: Uuid) -> io::Result<()> {
        match tokio::fs::remove_dir_all(self.report_dir(project, id)).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}

/// What happened when a finished report was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    /// The metadata row was written
    pub stored: bool,
    /// The latest pointer now references the report
    pub pointer_advanced: bool,
    /// Reports removed by the retention policy
    pub evicted: Vec<Uuid>,
}

/// Coordinates the metadata store, the report tree, the latest pointer and
/// the retention policy, one project at a time.
#[derive(Debug, Clone)]
pub struct ReportService {
    store: ReportStore,
    tree: ReportTree,
    retention: RetentionPolicy,
    locks: ProjectLocks,
}

impl ReportService {
    /// Bundle the collaborators. Share one `ProjectLocks` between every
    /// service instance of a process.
    pub fn new(
        store: ReportStore,
        tree: ReportTree,
        retention: RetentionPolicy,
        locks: ProjectLocks,
    ) -> Self {
        Self {
            store,
            tree,
            retention,
            locks,
        }
    }

    /// The metadata store.
    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    /// The report tree.
    pub fn tree(&self) -> &ReportTree {
        &self.tree
    }

    /// Reports of `project`, newest first.
    pub async fn project_reports(&self, project: &str) -> Result<Vec<Report>, StoreError> {
        self.store.project_reports(project).await
    }

    /// Record a finished report: upsert its row, move the latest pointer and
    /// apply retention, holding the project lock throughout.
    ///
    /// Best effort: each step logs its failure and the next step still runs.
    pub async fn record(&self, report: &Report) -> RecordOutcome {
        let project = report.project.as_str();
        let _guard = self.locks.lock(project).await;
        let project_dir = self.tree.project_dir(project);
        let mut outcome = RecordOutcome::default();

        match self.store.upsert(report).await {
            Ok(()) => outcome.stored = true,
            Err(error) => error!(report.id = %report.id, %error, "Failed to store report metadata"),
        }

        // Only a generated report whose directory exists may become latest;
        // a failed compile keeps the pointer on the previous good report
        let report_dir = self.tree.report_dir(project, report.id);
        let has_output =
            report.generated && tokio::fs::try_exists(&report_dir).await.unwrap_or(false);
        if has_output {
            let candidate = LatestPointer {
                id: report.id,
                created_at: report.created_at,
            };
            match latest::advance(&project_dir, candidate).await {
                Ok(advanced) => outcome.pointer_advanced = advanced,
                Err(error) => error!(project, %error, "Failed to update latest pointer"),
            }
        } else {
            debug!(report.id = %report.id, "No report output, latest pointer left alone");
        }

        match self.retention.enforce(&self.store, &self.tree, project).await {
            Ok(evicted) => outcome.evicted = evicted,
            Err(error) => error!(project, %error, "Failed to apply retention policy"),
        }

        if let Err(error) = self.repoint_if_evicted(project, &outcome.evicted).await {
            error!(project, %error, "Failed to repair latest pointer");
        }

        outcome
    }

    /// Delete a report's directory and row.
    ///
    /// If the latest pointer referenced the report it is moved to the next
    /// most recent report, or removed when none remain. Deleting an unknown
    /// id returns `NotFound` and changes nothing.
    pub async fn delete_report(&self, id: Uuid) -> Result<(), StoreError> {
        let project = self.store.owning_project(id).await?;
        let _guard = self.locks.lock(&project).await;

        self.tree.remove_report_dir(&project, id).await?;
        self.store.delete(id).await?;
        info!(report.id = %id, %project, "Deleted report");

        if let Err(error) = self.repoint_if_evicted(&project, &[id]).await {
            warn!(project, %error, "Failed to repair latest pointer after delete");
        }
        Ok(())
    }

    /// Rebuild the latest pointer from the metadata store.
    ///
    /// Recovers a pointer lost to a crash or a manual cleanup. Reports the
    /// compiler failed to generate are never pointed at.
    pub async fn recompute_latest(&self, project: &str) -> Result<Option<LatestPointer>, StoreError> {
        let _guard = self.locks.lock(project).await;
        self.repoint(project).await
    }

    async fn repoint_if_evicted(&self, project: &str, removed: &[Uuid]) -> Result<(), StoreError> {
        if removed.is_empty() {
            return Ok(());
        }
        let project_dir = self.tree.project_dir(project);
        let current = latest::read(&project_dir).await?;
        if current.is_some_and(|pointer| removed.contains(&pointer.id)) {
            self.repoint(project).await?;
        }
        Ok(())
    }

    async fn repoint(&self, project: &str) -> Result<Option<LatestPointer>, StoreError> {
        let pointer = self
            .store
            .latest_report(project)
            .await?
            .map(|report| LatestPointer {
                id: report.id,
                created_at: report.created_at,
            });
        latest::replace(&self.tree.project_dir(project), pointer).await?;
        debug!(project, latest = ?pointer.map(|p| p.id), "Latest pointer recomputed");
        Ok(pointer)
    }
}
