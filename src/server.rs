//! The HTTP API: uploads, report listing, report deletion and a health probe.

use crate::errors::{IngestError, StoreError};
use crate::ingest::{Ingestor, StagedArchive, normalize_project};
use crate::reports::ReportService;
use crate::schema::Report;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    ingestor: Ingestor,
    reports: ReportService,
    auth_token: Option<Arc<str>>,
}

impl AppState {
    /// State for [`router`]. Uploads and deletes require `auth_token` as a
    /// bearer token when one is given.
    pub fn new(ingestor: Ingestor, reports: ReportService, auth_token: Option<&str>) -> Self {
        Self {
            ingestor,
            reports,
            auth_token: auth_token.map(Arc::from),
        }
    }
}

/// Errors returned to HTTP clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The bearer token is missing or wrong.
    #[error("missing or invalid bearer token")]
    Unauthorized,

    /// The path segment is not a report id.
    #[error("invalid report id {0:?}")]
    InvalidId(String),

    /// The upload was rejected or could not be stored.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// The metadata store failed or the report does not exist.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The multipart body is malformed.
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidId(_) => StatusCode::BAD_REQUEST,
            Self::Ingest(error) => match error {
                IngestError::MissingFile
                | IngestError::InvalidProject(_)
                | IngestError::InvalidFileName(_)
                | IngestError::Body(_) => StatusCode::BAD_REQUEST,
                IngestError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                IngestError::Enqueue(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(error) => error.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            status.canonical_reason().unwrap_or("internal error").to_string()
        } else {
            debug!(error = %self, "Request rejected");
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the API router.
///
/// Axum's default body limit is disabled; uploads are bounded by the
/// ingestor's own ceiling.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/uploads", post(upload))
        .route("/api/reports/{id}", delete(delete_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/reports", get(list_reports))
        .merge(protected)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.auth_token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected) {
            warn!(uri = %request.uri(), "Rejected unauthenticated request");
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    project: Option<String>,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Report>>, ApiError> {
    let project = normalize_project(query.project.as_deref())?;
    Ok(Json(state.reports.project_reports(&project).await?))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    // The ceiling applies to the archive bytes and is enforced while staging
    let mut project = None;
    let mut staged: Option<StagedArchive> = None;
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("project") => {
                let text = field.text().await?;
                project = Some(normalize_project(Some(&text))?);
            }
            Some("file") if staged.is_none() => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                staged = Some(state.ingestor.stage(&file_name, field).await?);
            }
            other => debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    let staged = staged.ok_or(IngestError::MissingFile)?;
    let id = state.ingestor.commit(staged, project.as_deref()).await?;
    info!(job.id = %id, "Upload queued");

    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "id": id }))).into_response())
}

async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::InvalidId(id))?;
    state.reports.delete_report(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
