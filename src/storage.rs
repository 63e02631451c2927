use crate::schema::BackgroundJob;
use sqlx::SqlitePool;
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a SQLite pool for the queue or the report metadata.
///
/// The database file and its parent directory are created when missing.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Several workers and request handlers share the file
        .busy_timeout(BUSY_TIMEOUT);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    SqlitePoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .connect_with(options)
        .await
}

/// Create the `background_jobs` and `reports` tables.
///
/// Safe to run on every start, and on both the queue and the metadata
/// database when they are separate files.
pub async fn setup_database(pool: &SqlitePool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Appends a job to the tail of the queue.
pub(crate) async fn insert_job(
    pool: &SqlitePool,
    job_type: &str,
    data: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO background_jobs (job_type, data) VALUES (?1, ?2) RETURNING id",
    )
    .bind(job_type)
    .bind(data)
    .fetch_one(pool)
    .await
}

/// Removes and returns the oldest job of one of the given types.
///
/// The select and the delete happen in a single statement, so a job is
/// handed to at most one worker. Returns `None` when nothing is waiting.
pub(crate) async fn dequeue_next_job(
    pool: &SqlitePool,
    job_types: &[String],
) -> Result<Option<BackgroundJob>, sqlx::Error> {
    let job_types = serde_json::to_string(job_types)
        .map_err(|error| sqlx::Error::Encode(Box::new(error)))?;

    sqlx::query_as::<_, BackgroundJob>(
        r"
        DELETE FROM background_jobs
        WHERE id = (
            SELECT id FROM background_jobs
            WHERE job_type IN (SELECT value FROM json_each(?1))
            ORDER BY id ASC
            LIMIT 1
        )
        RETURNING id, job_type, data, created_at
        ",
    )
    .bind(job_types)
    .fetch_optional(pool)
    .await
}

/// The number of jobs waiting in the queue
pub async fn pending_job_count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM background_jobs")
        .fetch_one(pool)
        .await
}
