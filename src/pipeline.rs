//! The `generate_report` job: archive in, report directory and metadata out.

use crate::BackgroundJob;
use crate::archive;
use crate::compiler::ReportCompiler;
use crate::reports::ReportService;
use crate::results::{self, ResultCounts};
use crate::schema::Report;
use anyhow::Context as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a report job needs at runtime.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Report directories, metadata and retention
    pub reports: ReportService,
    /// The external report compiler
    pub compiler: ReportCompiler,
    /// Ceiling on the bytes unpacked from one archive
    pub max_extracted_bytes: u64,
}

/// Turn one uploaded archive into a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReport {
    /// Job id, reused as the report id
    pub id: Uuid,
    /// Owning project
    pub project: String,
    /// The committed archive in the archive store
    pub archive_path: PathBuf,
}

impl BackgroundJob for GenerateReport {
    const JOB_TYPE: &'static str = "generate_report";

    type Context = PipelineContext;

    async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
        let result = self.generate(&ctx).await;
        self.discard_archive().await;
        result
    }
}

impl GenerateReport {
    async fn generate(&self, ctx: &PipelineContext) -> anyhow::Result<()> {
        let work_dir = tempfile::Builder::new()
            .prefix("reportflow-")
            .tempdir()
            .context("Failed to create working directory")?;
        let extract_root = work_dir.path().join(archive::RESULTS_DIR_NAME);

        let (results_dir, counts) = {
            let archive_path = self.archive_path.clone();
            let extract_root = extract_root.clone();
            let max_bytes = ctx.max_extracted_bytes;
            tokio::task::spawn_blocking(move || {
                unpack_and_count(&archive_path, &extract_root, max_bytes)
            })
            .await
            .context("Extraction task failed")??
        };
        info!(
            results = %results_dir.display(),
            total = counts.total,
            passed = counts.passed,
            failed = counts.failed,
            "Counted results"
        );

        let tree = ctx.reports.tree();
        tokio::fs::create_dir_all(tree.project_dir(&self.project))
            .await
            .context("Failed to create project directory")?;
        let report_dir = tree.report_dir(&self.project, self.id);
        let generated = ctx
            .compiler
            .compile(&results_dir, &report_dir)
            .await
            .is_generated();

        let report = Report::from_counts(self.id, &self.project, counts, generated, Utc::now());
        let outcome = ctx.reports.record(&report).await;
        info!(
            report.id = %self.id,
            project = %self.project,
            status = %report.status,
            generated,
            stored = outcome.stored,
            latest = outcome.pointer_advanced,
            evicted = outcome.evicted.len(),
            "Report finished"
        );

        Ok(())
    }

    /// Remove the uploaded archive and its job directory, whatever the outcome.
    async fn discard_archive(&self) {
        let id = self.id.to_string();
        let target = match self.archive_path.parent() {
            Some(dir) if dir.file_name() == Some(OsStr::new(&id)) => dir,
            _ => self.archive_path.as_path(),
        };
        let removed = if target.is_dir() {
            tokio::fs::remove_dir_all(target).await
        } else {
            tokio::fs::remove_file(target).await
        };
        if let Err(error) = removed {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %target.display(), %error, "Failed to remove uploaded archive");
            }
        }
    }
}

fn unpack_and_count(
    archive_path: &Path,
    extract_root: &Path,
    max_bytes: u64,
) -> anyhow::Result<(PathBuf, ResultCounts)> {
    std::fs::create_dir_all(extract_root)?;
    let format = archive::extract_detected(archive_path, extract_root, max_bytes)
        .with_context(|| format!("Failed to extract {}", archive_path.display()))?;
    debug!(?format, "Extracted archive");
    let results_dir = archive::locate_results_dir(extract_root);
    let counts = results::count_results(&results_dir);
    Ok((results_dir, counts))
}
