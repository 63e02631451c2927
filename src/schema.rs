//! Database row types and the report model.
//!
//! `background_jobs` holds queued work and `reports` holds one row per
//! generated report. Both tables are created by [`crate::setup_database`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::results::ResultCounts;

/// Represents a queued job record in the database
#[derive(Debug, Clone, FromRow)]
pub struct BackgroundJob {
    /// Unique identifier for the job; also its FIFO position
    pub id: i64,
    /// Type identifier for the job (used for dispatch)
    pub job_type: String,
    /// JSON text containing the job payload
    pub data: String,
    /// Timestamp when the job was created
    pub created_at: DateTime<Utc>,
}

/// Outcome of a test run as recorded on a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// No result was recorded as failed.
    Passed,
    /// At least one result was recorded as failed.
    Failed,
}

impl ReportStatus {
    /// `Failed` iff `failed > 0`.
    pub fn from_failed_count(failed: u32) -> Self {
        if failed > 0 { Self::Failed } else { Self::Passed }
    }

    /// Text stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown report status {other:?}")),
        }
    }
}

/// The durable record of one generated report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Same id as the job that produced the report
    pub id: Uuid,
    /// Owning project
    pub project: String,
    /// When generation completed
    pub created_at: DateTime<Utc>,
    /// Derived from `failed`
    pub status: ReportStatus,
    /// Number of result files found
    pub total: u32,
    /// Results recorded as passed
    pub passed: u32,
    /// Results recorded as failed
    pub failed: u32,
    /// Whether the report compiler finished successfully
    pub generated: bool,
}

impl Report {
    /// Build a report from counted results. The status is derived here and
    /// nowhere else.
    pub fn from_counts(
        id: Uuid,
        project: impl Into<String>,
        counts: ResultCounts,
        generated: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            project: project.into(),
            created_at,
            status: ReportStatus::from_failed_count(counts.failed),
            total: counts.total,
            passed: counts.passed,
            failed: counts.failed,
            generated,
        }
    }
}
