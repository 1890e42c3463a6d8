//! Import endpoints: file upload, provider sync kickoff and run status.

use super::error::ApiError;
use super::metrics::{record_import_run, record_imported_plays};
use super::state::ServerState;
use crate::importer::{ImportCounts, MAX_PAYLOAD_BYTES};
use crate::library_store::{ImportRun, SqliteLibraryStore};
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    ok: bool,
    #[serde(flatten)]
    counts: ImportCounts,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportStatusResponse {
    latest_import: Option<ImportRun>,
    last_import_at: Option<DateTime<Utc>>,
    last_import_status: Option<String>,
}

fn resolve_user(store: &SqliteLibraryStore, handle: &str) -> Result<i64, ApiError> {
    Ok(store.ensure_user(handle)?)
}

/// POST /user/{user_id}/import - one or more history files, either as
/// multipart/form-data or a single raw JSON body.
async fn import_files(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
    request: axum::extract::Request,
) -> Result<Response, ApiError> {
    let user_rowid = resolve_user(&state.store, &user_handle)?;
    let files = collect_files(request).await?;
    if files.is_empty() {
        return Err(ApiError::bad_request("No import files in request"));
    }

    let source_label = "file";
    let counts = match state.import_manager.import_files(user_rowid, files).await {
        Ok(counts) => counts,
        Err(err) => {
            record_import_run(source_label, "failed");
            return Err(err.into());
        }
    };
    record_import_run(source_label, "completed");
    record_imported_plays(counts.imported_plays, counts.skipped_plays);

    info!(
        "File import for '{}': {} plays imported, {} skipped",
        user_handle, counts.imported_plays, counts.skipped_plays
    );
    Ok(Json(ImportResponse { ok: true, counts }).into_response())
}

async fn collect_files(request: axum::extract::Request) -> Result<Vec<Vec<u8>>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| ApiError::bad_request(format!("Invalid multipart body: {}", err)))?;
        let mut files = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::bad_request(format!("Invalid multipart field: {}", err)))?
        {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(format!("Unreadable upload: {}", err)))?;
            if !bytes.is_empty() {
                files.push(bytes.to_vec());
            }
        }
        Ok(files)
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_PAYLOAD_BYTES)
            .await
            .map_err(|err| {
                ApiError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Could not read request body: {}", err),
                )
            })?;
        if bytes.is_empty() {
            Ok(vec![])
        } else {
            Ok(vec![bytes.to_vec()])
        }
    }
}

/// POST /user/{user_id}/import/sync - start a background provider sync.
async fn start_sync(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
) -> Result<Response, ApiError> {
    let user_rowid = resolve_user(&state.store, &user_handle)?;
    let run = state.import_manager.start_provider_sync(user_rowid)?;
    info!("Started provider sync {} for '{}'", run.id, user_handle);
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "runId": run.id }))).into_response())
}

/// GET /user/{user_id}/import/status
async fn import_status(
    State(state): State<ServerState>,
    Path(user_handle): Path<String>,
) -> Result<Json<ImportStatusResponse>, ApiError> {
    let user_rowid = resolve_user(&state.store, &user_handle)?;
    let latest = state.store.latest_import_run(user_rowid)?;
    let user = state
        .store
        .get_user(&user_handle)?
        .ok_or_else(|| ApiError::not_found("Unknown user"))?;
    Ok(Json(ImportStatusResponse {
        latest_import: latest,
        last_import_at: user.last_import_at,
        last_import_status: user.last_import_status,
    }))
}

pub fn make_import_routes() -> Router<ServerState> {
    Router::new()
        .route("/user/{user_id}/import", post(import_files))
        .route("/user/{user_id}/import/sync", post(start_sync))
        .route("/user/{user_id}/import/status", get(import_status))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
}
