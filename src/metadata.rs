//! The `reports` table.

use crate::errors::StoreError;
use crate::schema::{Report, ReportStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

const REPORT_COLUMNS: &str = "id, project, created_at, status, total, passed, failed, generated";

/// Fixed-width text so that ordering by the column is chronological.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, FromRow)]
struct ReportRow {
    id: String,
    project: String,
    created_at: String,
    status: String,
    total: i64,
    passed: i64,
    failed: i64,
    generated: bool,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, detail: String| {
            StoreError::Corrupt(format!("{what} of report {}: {detail}", row.id))
        };
        let counter = |what: &str, value: i64| {
            u32::try_from(value).map_err(|error| corrupt(what, error.to_string()))
        };

        Ok(Report {
            id: Uuid::parse_str(&row.id).map_err(|error| corrupt("id", error.to_string()))?,
            created_at: DateTime::parse_from_rfc3339(&row.created_at)
                .map_err(|error| corrupt("created_at", error.to_string()))?
                .with_timezone(&Utc),
            status: row
                .status
                .parse::<ReportStatus>()
                .map_err(|error| corrupt("status", error))?,
            total: counter("total", row.total)?,
            passed: counter("passed", row.passed)?,
            failed: counter("failed", row.failed)?,
            generated: row.generated,
            project: row.project.clone(),
        })
    }
}

/// Access to report metadata.
#[derive(Debug, Clone)]
pub struct ReportStore {
    pool: SqlitePool,
}

impl ReportStore {
    /// Wrap a pool whose database has been set up with [`crate::setup_database`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a report, or replace every column of the report with the same id.
    pub async fn upsert(&self, report: &Report) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO reports (id, project, created_at, status, total, passed, failed, generated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                project = excluded.project,
                created_at = excluded.created_at,
                status = excluded.status,
                total = excluded.total,
                passed = excluded.passed,
                failed = excluded.failed,
                generated = excluded.generated
            ",
        )
        .bind(report.id.to_string())
        .bind(&report.project)
        .bind(encode_timestamp(&report.created_at))
        .bind(report.status.as_str())
        .bind(i64::from(report.total))
        .bind(i64::from(report.passed))
        .bind(i64::from(report.failed))
        .bind(report.generated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reports of `project`, newest first.
    ///
    /// Reports with equal timestamps are returned in reverse insertion order,
    /// so the oldest insert comes last and is evicted first.
    pub async fn project_reports(&self, project: &str) -> Result<Vec<Report>, StoreError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE project = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Report::try_from).collect()
    }

    /// The newest generated report of `project`, if any.
    pub async fn latest_report(&self, project: &str) -> Result<Option<Report>, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE project = ?1 AND generated = 1 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(project)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Report::try_from).transpose()
    }

    /// Look up a single report.
    pub async fn get(&self, id: Uuid) -> Result<Report, StoreError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    /// The project a report belongs to.
    pub async fn owning_project(&self, id: Uuid) -> Result<String, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT project FROM reports WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Delete a report row.
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_encode_with_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2024-06-01T12:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(encode_timestamp(&a), "2024-06-01T12:00:00.000000Z");
        assert_eq!(encode_timestamp(&b), "2024-06-01T12:00:00.500000Z");
        assert!(encode_timestamp(&a) < encode_timestamp(&b));
    }
}
