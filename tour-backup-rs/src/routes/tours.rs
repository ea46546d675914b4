use crate::error::AppError;
use crate::models::tour;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tours).post(create_tour))
        .route("/{id}", get(get_tour))
}

async fn list_tours(State(state): State<Arc<AppState>>) -> Result<Json<Vec<tour::Tour>>, AppError> {
    let db = state.db.clone();
    let tours = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        tour::find_all(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(tours))
}

async fn get_tour(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<tour::TourTree>, AppError> {
    let db = state.db.clone();
    let tree = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        tour::find_tree(&conn, &id)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    match tree {
        Some(tree) => Ok(Json(tree)),
        None => Err(AppError::NotFound("Tour not found".into())),
    }
}

/// Ingest a tour with its full floor/point/photo hierarchy in one call.
async fn create_tour(
    State(state): State<Arc<AppState>>,
    Json(body): Json<tour::CreateTourRequest>,
) -> Result<(axum::http::StatusCode, Json<tour::Tour>), AppError> {
    if body.owner_id.is_empty() {
        return Err(AppError::BadRequest("owner_id is required".into()));
    }
    if body.title.is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }

    let db = state.db.clone();
    let created = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        tour::create(&conn, &body)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok((axum::http::StatusCode::CREATED, Json(created)))
}
