use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/download/{*path}", get(download))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    expires: i64,
    sig: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    if !state.signer.verify(&path, query.expires, &query.sig) {
        return Err(AppError::BadRequest(
            "Download link is invalid or expired".into(),
        ));
    }

    let blob = state.blob.clone();
    let blob_path = path.clone();
    let bytes = tokio::task::spawn_blocking(move || blob.get(&blob_path))
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .map_err(|_| AppError::NotFound("File not found".into()))?;

    let filename = query.filename.unwrap_or_else(|| {
        path.rsplit('/').next().unwrap_or("download").to_string()
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
