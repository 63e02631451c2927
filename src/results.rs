//! Counting outcomes in an extracted results directory.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// File name suffix of a single test result.
pub const RESULT_FILE_SUFFIX: &str = "-result.json";

const PASSED: &str = "passed";
const FAILED: &str = "failed";

/// Totals derived from the result files of one run.
///
/// Every result file counts toward `total`; at most one of `passed` and
/// `failed` is incremented per file, so `passed + failed <= total` holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    /// Number of result files found
    pub total: u32,
    /// Results whose status is `passed`
    pub passed: u32,
    /// Results whose status is `failed`
    pub failed: u32,
}

impl ResultCounts {
    fn record(&mut self, status: Option<&str>) {
        self.total += 1;
        match status {
            Some(PASSED) => self.passed += 1,
            Some(FAILED) => self.failed += 1,
            _ => {}
        }
    }
}

#[derive(Deserialize)]
struct ResultFile {
    #[serde(default)]
    status: Option<String>,
}

/// Returns `true` if `name` looks like a result file.
pub fn is_result_file(name: &str) -> bool {
    name.ends_with(RESULT_FILE_SUFFIX)
}

/// Scan `dir` recursively and tally the status of every result file.
///
/// Unknown statuses (`broken`, `skipped`, …), missing statuses and files
/// that are not valid JSON only count toward the total.
pub fn count_results(dir: &Path) -> ResultCounts {
    let mut counts = ResultCounts::default();

    let entries = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_result_file));

    for entry in entries {
        let status = match std::fs::read(entry.path()) {
            Ok(bytes) => match serde_json::from_slice::<ResultFile>(&bytes) {
                Ok(result) => result.status,
                Err(error) => {
                    warn!(path = %entry.path().display(), %error, "Unreadable result file");
                    None
                }
            },
            Err(error) => {
                warn!(path = %entry.path().display(), %error, "Failed to read result file");
                None
            }
        };
        counts.record(status.as_deref());
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn counts_passed_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a-result.json", r#"{"name":"a","status":"passed"}"#);
        write(dir.path(), "b-result.json", r#"{"name":"b","status":"passed"}"#);
        write(dir.path(), "c-result.json", r#"{"name":"c","status":"failed"}"#);

        let counts = count_results(dir.path());
        assert_eq!(
            counts,
            ResultCounts {
                total: 3,
                passed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn unknown_statuses_only_count_toward_total() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a-result.json", r#"{"status":"broken"}"#);
        write(dir.path(), "b-result.json", r#"{"status":"skipped"}"#);
        write(dir.path(), "c-result.json", r#"{"name":"no status"}"#);
        write(dir.path(), "d-result.json", "not json at all");
        write(dir.path(), "e-result.json", r#"{"status":"passed"}"#);

        let counts = count_results(dir.path());
        assert_eq!(counts.total, 5);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn ignores_containers_and_attachments() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x-container.json", r#"{"status":"failed"}"#);
        write(dir.path(), "y-attachment.txt", "failed");
        write(dir.path(), "z-result.json", r#"{"status":"passed"}"#);

        let counts = count_results(dir.path());
        assert_eq!(counts.total, 1);
        assert_eq!(counts.passed, 1);
    }

    #[test]
    fn scans_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("suite").join("inner");
        fs::create_dir_all(&nested).unwrap();
        write(&nested, "a-result.json", r#"{"status":"failed"}"#);

        assert_eq!(count_results(dir.path()).failed, 1);
    }

    #[test]
    fn empty_directory_has_no_results() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(count_results(dir.path()), ResultCounts::default());
    }
}
