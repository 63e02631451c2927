//! Invocation of the external report compiler.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Default upper bound for one compiler run.
pub const DEFAULT_COMPILER_TIMEOUT: Duration = Duration::from_secs(600);

/// The command that turns a results directory into an HTML report.
///
/// Invoked as `{program} {base_args…} <results> -o <output> --clean`, which
/// matches `allure generate`.
#[derive(Debug, Clone)]
pub struct ReportCompiler {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

/// How a compiler run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Exit status zero.
    Generated,
    /// The compiler exited unsuccessfully.
    Failed {
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },
    /// The compiler did not finish in time and was killed.
    TimedOut,
    /// The compiler could not be started.
    Unavailable(String),
}

impl CompileOutcome {
    /// Whether a complete report was written.
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated)
    }
}

impl Default for ReportCompiler {
    fn default() -> Self {
        Self::new("allure", vec!["generate".to_string()])
    }
}

impl ReportCompiler {
    /// A compiler run as `program base_args…`.
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            timeout: DEFAULT_COMPILER_TIMEOUT,
        }
    }

    /// Set how long a run may take before the child is killed.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render `results` into `output`.
    ///
    /// Never fails: the outcome is logged and returned so that callers can
    /// record a report even when generation went wrong.
    pub async fn compile(&self, results: &Path, output: &Path) -> CompileOutcome {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .arg(results)
            .arg("-o")
            .arg(output)
            .arg("--clean")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(program = %self.program, output = %output.display(), "Running report compiler…");

        let outcome = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => CompileOutcome::TimedOut,
            Ok(Err(error)) => CompileOutcome::Unavailable(error.to_string()),
            Ok(Ok(out)) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                if !stdout.trim().is_empty() {
                    debug!(stdout = %stdout.trim(), "Report compiler output");
                }
                if out.status.success() {
                    CompileOutcome::Generated
                } else {
                    CompileOutcome::Failed {
                        code: out.status.code(),
                        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                    }
                }
            }
        };

        match &outcome {
            CompileOutcome::Generated => debug!("Report compiler finished"),
            CompileOutcome::Failed { code, stderr } => {
                warn!(?code, %stderr, "Report compiler exited unsuccessfully");
            }
            CompileOutcome::TimedOut => {
                warn!(timeout = ?self.timeout, "Report compiler timed out and was killed");
            }
            CompileOutcome::Unavailable(reason) => {
                error!(program = %self.program, %reason, "Report compiler could not be started");
            }
        }

        outcome
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ReportCompiler {
        ReportCompiler::new("sh", vec!["-c".to_string(), script.to_string(), "sh".to_string()])
    }

    #[tokio::test]
    async fn passes_results_and_output_paths() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let output = dir.path().join("report");
        std::fs::create_dir(&results).unwrap();

        let compiler = sh(r#"[ "$2" = "-o" ] && [ "$4" = "--clean" ] && mkdir -p "$3" && : > "$3/index.html""#);
        let outcome = compiler.compile(&results, &output).await;

        assert_eq!(outcome, CompileOutcome::Generated);
        assert!(output.join("index.html").exists());
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = sh("echo broken >&2; exit 3")
            .compile(dir.path(), &dir.path().join("out"))
            .await;

        assert_eq!(
            outcome,
            CompileOutcome::Failed {
                code: Some(3),
                stderr: "broken".to_string()
            }
        );
        assert!(!outcome.is_generated());
    }

    #[tokio::test]
    async fn slow_compiler_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = sh("sleep 5")
            .timeout(Duration::from_millis(100))
            .compile(dir.path(), &dir.path().join("out"))
            .await;

        assert_eq!(outcome, CompileOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ReportCompiler::new("definitely-not-a-report-compiler", vec![])
            .compile(dir.path(), &dir.path().join("out"))
            .await;

        assert!(matches!(outcome, CompileOutcome::Unavailable(_)));
    }
}
