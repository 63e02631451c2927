//! Shared setup for the pipeline and API tests.
#![allow(dead_code)]

use bytes::Bytes;
use futures_util::stream;
use reportflow::archive::DEFAULT_MAX_EXTRACTED_BYTES;
use reportflow::compiler::ReportCompiler;
use reportflow::ingest::Ingestor;
use reportflow::locks::ProjectLocks;
use reportflow::metadata::ReportStore;
use reportflow::pipeline::{GenerateReport, PipelineContext};
use reportflow::reports::{ReportService, ReportTree};
use reportflow::retention::RetentionPolicy;
use reportflow::{Runner, pending_job_count};
use sqlx::SqlitePool;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Writes `<html>` into the output directory, like a real compiler would.
pub const WRITING_COMPILER: &str = r#"mkdir -p "$3" && echo '<html></html>' > "$3/index.html""#;

/// Fails after printing to stderr.
pub const FAILING_COMPILER: &str = "echo 'cannot render' >&2; exit 3";

/// A compiler run through `sh -c`. Positional args: `$1` results, `$2` `-o`,
/// `$3` output, `$4` `--clean`.
pub fn sh_compiler(script: &str) -> ReportCompiler {
    ReportCompiler::new(
        "sh",
        vec!["-c".to_string(), script.to_string(), "sh".to_string()],
    )
}

/// Queue, metadata, upload and report roots inside one temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub queue: SqlitePool,
    pub reports: ReportService,
    pub ingestor: Ingestor,
    pub compiler: ReportCompiler,
    pub max_extracted_bytes: u64,
}

impl Harness {
    pub async fn new(max_reports: usize) -> anyhow::Result<Self> {
        Self::with_compiler(max_reports, sh_compiler(WRITING_COMPILER)).await
    }

    pub async fn with_compiler(
        max_reports: usize,
        compiler: ReportCompiler,
    ) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;

        let queue = reportflow::connect(&sqlite_url(&dir.path().join("queue.db"))).await?;
        reportflow::setup_database(&queue).await?;
        let metadata = reportflow::connect(&sqlite_url(&dir.path().join("app.db"))).await?;
        reportflow::setup_database(&metadata).await?;

        let reports = ReportService::new(
            ReportStore::new(metadata),
            ReportTree::new(dir.path().join("reports")),
            RetentionPolicy::new(max_reports),
            ProjectLocks::default(),
        );
        let ingestor = Ingestor::new(dir.path().join("uploads"), queue.clone());

        Ok(Self {
            dir,
            queue,
            reports,
            ingestor,
            compiler,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        })
    }

    pub fn upload_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.reports.tree().project_dir(project)
    }

    pub fn report_dir(&self, project: &str, id: Uuid) -> PathBuf {
        self.reports.tree().report_dir(project, id)
    }

    /// Upload an in-memory archive through the ingestor.
    pub async fn upload(
        &self,
        project: Option<&str>,
        file_name: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<Uuid> {
        Ok(self
            .ingestor
            .accept(project, file_name, bytes_stream(data))
            .await?)
    }

    /// Run workers until the queue is empty.
    pub async fn drain(&self, num_workers: usize) -> anyhow::Result<()> {
        let context = PipelineContext {
            reports: self.reports.clone(),
            compiler: self.compiler.clone(),
            max_extracted_bytes: self.max_extracted_bytes,
        };
        Runner::new(self.queue.clone(), context)
            .configure_queue("reports", |queue| {
                queue
                    .num_workers(num_workers)
                    .poll_interval(Duration::from_millis(20))
                    .register::<GenerateReport>()
            })
            .shutdown_when_queue_empty()
            .start()
            .wait_for_shutdown()
            .await;

        assert_eq!(pending_job_count(&self.queue).await?, 0);
        Ok(())
    }
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

pub fn bytes_stream(
    data: Vec<u8>,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    stream::iter([Ok(Bytes::from(data))])
}

/// A JSON result file with the given status.
pub fn result_json(name: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "name": name, "status": status }))
        .unwrap_or_default()
}

/// `(path inside the archive, contents)` pairs for result files.
pub fn result_files(prefix: &str, statuses: &[&str]) -> Vec<(String, Vec<u8>)> {
    statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            (
                format!("{prefix}{i}-result.json"),
                result_json(&format!("test {i}"), status),
            )
        })
        .collect()
}

pub fn zip_archive(files: &[(String, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn append_tar<W: Write>(builder: &mut tar::Builder<W>, files: &[(String, Vec<u8>)]) -> anyhow::Result<()> {
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_slice())?;
    }
    Ok(())
}

pub fn tar_zst_archive(files: &[(String, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let encoder = zstd::stream::write::Encoder::new(Vec::new(), 3)?;
    let mut builder = tar::Builder::new(encoder);
    append_tar(&mut builder, files)?;
    Ok(builder.into_inner()?.finish()?)
}

pub fn tar_gz_archive(files: &[(String, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tar(&mut builder, files)?;
    Ok(builder.into_inner()?.finish()?)
}

/// Names of the report directories in a project directory.
pub fn report_dirs(project_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(project_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
