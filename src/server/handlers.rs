//! Route handlers. Filesystem and process work runs on the blocking pool.

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use tracing::info;

use zipcheck_archive::ArchiveBuilder;

use super::error::ServerError;
use super::AppState;

/// Multipart field carrying the archive
pub const UPLOAD_FIELD: &str = "file";

/// File name offered for downloads
pub const DOWNLOAD_NAME: &str = "download.zip";

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ServerError::BadRequest("upload is missing a file name".to_string()))?;
        let bytes: Bytes = field.bytes().await?;

        let workspace = state.workspace.clone();
        let stored = tokio::task::spawn_blocking(move || -> Result<_, ServerError> {
            let _lock = workspace.lock()?;
            Ok(workspace.store_upload(&file_name, &bytes)?)
        })
        .await??;

        info!(path = %stored.display(), "upload accepted");
        return Ok(Redirect::to(&state.redirect_to).into_response());
    }

    Err(ServerError::BadRequest(format!(
        "missing multipart field {:?}",
        UPLOAD_FIELD
    )))
}

pub async fn download(State(state): State<AppState>) -> Result<Response, ServerError> {
    let workspace = state.workspace.clone();
    let archive = tokio::task::spawn_blocking(move || -> Result<_, ServerError> {
        let _lock = workspace.lock()?;
        std::fs::create_dir_all(workspace.staging_dir())?;
        Ok(ArchiveBuilder::new(workspace.staging_dir()).build()?)
    })
    .await??;

    info!(
        entries = archive.entries.len(),
        bytes = archive.bytes.len(),
        sha256 = %archive.sha256,
        "download built"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", DOWNLOAD_NAME),
            ),
        ],
        archive.bytes,
    )
        .into_response())
}

pub async fn answer(State(state): State<AppState>) -> Result<Response, ServerError> {
    let pipeline = state.pipeline.clone();
    let report = tokio::task::spawn_blocking(move || pipeline.run()).await?;

    let status = StatusCode::from_u16(report.outcome().http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    Ok((
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        report.body(),
    )
        .into_response())
}

pub async fn healthz() -> &'static str {
    "ok"
}
