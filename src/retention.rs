use crate::errors::StoreError;
use crate::metadata::ReportStore;
use crate::reports::ReportTree;
use tracing::{info, warn};
use uuid::Uuid;

/// Number of reports kept per project unless configured otherwise.
pub const DEFAULT_MAX_REPORTS: usize = 20;

/// Bounds the number of reports kept per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_reports: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_reports: DEFAULT_MAX_REPORTS,
        }
    }
}

impl RetentionPolicy {
    /// Keep at most `max_reports` per project. Zero falls back to the default.
    pub fn new(max_reports: usize) -> Self {
        if max_reports == 0 {
            return Self::default();
        }
        Self { max_reports }
    }

    /// The configured limit.
    pub fn max_reports(&self) -> usize {
        self.max_reports
    }

    /// Evict every report of `project` beyond the newest `max_reports`.
    ///
    /// Each evicted report loses its directory first and its row second. If
    /// a directory cannot be removed the row stays, so that directories on
    /// disk always have a row. Returns the ids that were evicted.
    pub async fn enforce(
        &self,
        store: &ReportStore,
        tree: &ReportTree,
        project: &str,
    ) -> Result<Vec<Uuid>, StoreError> {
        let reports = store.project_reports(project).await?;
        if reports.len() <= self.max_reports {
            return Ok(Vec::new());
        }

        let mut evicted = Vec::new();
        for report in reports.iter().skip(self.max_reports) {
            if let Err(error) = tree.remove_report_dir(project, report.id).await {
                warn!(report.id = %report.id, %error, "Failed to remove report directory, keeping its row");
                continue;
            }
            match store.delete(report.id).await {
                // Another worker got there first
                Ok(()) | Err(StoreError::NotFound(_)) => evicted.push(report.id),
                Err(error) => return Err(error),
            }
        }

        info!(project, evicted = evicted.len(), max_reports = self.max_reports, "Applied retention policy");
        Ok(evicted)
    }
}
