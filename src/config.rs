//! Runtime settings, read from flags or the environment.

use crate::archive::DEFAULT_MAX_EXTRACTED_BYTES;
use crate::compiler::{DEFAULT_COMPILER_TIMEOUT, ReportCompiler};
use crate::ingest::DEFAULT_MAX_UPLOAD_BYTES;
use crate::retention::{DEFAULT_MAX_REPORTS, RetentionPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the API process and the worker process.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Address the HTTP API binds to
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    pub listen_addr: SocketAddr,

    /// SQLite database holding the work queue
    #[arg(long, env = "QUEUE_URL", default_value = "sqlite:///data/queue.db")]
    pub queue_url: String,

    /// SQLite database holding report metadata
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:///data/app.db")]
    pub database_url: String,

    /// Where uploaded archives are kept until processed
    #[arg(long, env = "UPLOAD_ROOT", default_value = "/data/uploads")]
    pub upload_root: PathBuf,

    /// Where generated reports are written
    #[arg(long, env = "REPORT_ROOT", default_value = "/reports")]
    pub report_root: PathBuf,

    /// Reports kept per project; 0 means the default
    #[arg(long, env = "MAX_REPORTS_PER_PROJECT", default_value_t = DEFAULT_MAX_REPORTS)]
    pub max_reports_per_project: usize,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Largest total size in bytes an archive may unpack to
    #[arg(long, env = "MAX_EXTRACTED_BYTES", default_value_t = DEFAULT_MAX_EXTRACTED_BYTES)]
    pub max_extracted_bytes: u64,

    /// Bearer token required for uploads and deletes
    #[arg(long, env = "API_AUTH_TOKEN", hide_env_values = true)]
    pub api_auth_token: Option<String>,

    /// Report compiler executable
    #[arg(long, env = "REPORT_COMPILER", default_value = "allure")]
    pub report_compiler: String,

    /// Arguments placed before the results directory
    #[arg(
        long,
        env = "REPORT_COMPILER_ARGS",
        default_value = "generate",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub report_compiler_args: Vec<String>,

    /// Seconds a compiler run may take before it is killed
    #[arg(long, env = "COMPILER_TIMEOUT_SECS", default_value_t = DEFAULT_COMPILER_TIMEOUT.as_secs())]
    pub compiler_timeout_secs: u64,

    /// Number of concurrent report workers
    #[arg(long, env = "NUM_WORKERS", default_value_t = 1)]
    pub num_workers: usize,

    /// Queue poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

impl Config {
    /// The retention policy for every project.
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_reports_per_project)
    }

    /// The configured report compiler.
    pub fn compiler(&self) -> ReportCompiler {
        let args = self
            .report_compiler_args
            .iter()
            .filter(|arg| !arg.is_empty())
            .cloned()
            .collect();
        ReportCompiler::new(&self.report_compiler, args)
            .timeout(Duration::from_secs(self.compiler_timeout_secs))
    }

    /// How long an idle worker waits before polling again.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The bearer token, if one is set. A blank value disables auth.
    pub fn auth_token(&self) -> Option<&str> {
        self.api_auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// At least one worker.
    pub fn num_workers(&self) -> usize {
        self.num_workers.max(1)
    }
}
