//! Caption indexing and semantic image search.

use crate::routes::upload::read_upload_form;
use crate::server::AppState;
use crate::{GatewayError, Result};
use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

const DEFAULT_RESULTS: usize = 10;

pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route("/api/index-image", post(index_image))
        .route("/api/search-images", post(search_images))
        .route("/api/get-all-images", get(get_all_images))
        .route("/api/delete-image", post(delete_image))
        .route("/api/clear-database", post(clear_database))
        .route("/api/stats", get(stats))
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| GatewayError::BadRequest(e.body_text()))
}

/// Save the upload, caption it with the vision model and index the caption.
async fn index_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>> {
    let form = read_upload_form(multipart).await?;
    let stored = state.uploads.save(&form.filename, &form.bytes).await?;

    let caption = state
        .caption_and_index(&stored, form.prompt.as_deref(), BTreeMap::new())
        .await?;

    Ok(Json(json!({
        "success": true,
        "filename": stored.filename,
        "url": stored.url,
        "caption": caption,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    n_results: Option<usize>,
}

async fn search_images(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = json_body(payload)?;
    if request.query.trim().is_empty() {
        return Err(GatewayError::BadRequest("Query cannot be empty".into()));
    }
    let n_results = request.n_results.unwrap_or(DEFAULT_RESULTS);

    let store = state.store.clone();
    let query = request.query.clone();
    let results =
        tokio::task::spawn_blocking(move || store.blocking_read().search(&query, n_results))
            .await??;

    Ok(Json(json!({
        "success": true,
        "query": request.query,
        "count": results.len(),
        "results": results,
    })))
}

async fn get_all_images(State(state): State<AppState>) -> Result<Json<Value>> {
    let results = state.store.read().await.get_all();
    Ok(Json(json!({
        "success": true,
        "count": results.len(),
        "results": results,
    })))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    image_path: String,
}

async fn delete_image(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let request = json_body(payload)?;

    let store = state.store.clone();
    let image_path = request.image_path.clone();
    let deleted =
        tokio::task::spawn_blocking(move || store.blocking_write().delete_image(&image_path))
            .await??;

    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
        "image_path": request.image_path,
    })))
}

async fn clear_database(State(state): State<AppState>) -> Result<Json<Value>> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.blocking_write().clear_all()).await??;
    Ok(Json(json!({ "success": true })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let store = state.store.read().await;
    Ok(Json(json!({
        "success": true,
        "total_images": store.count(),
        "collection": store.collection(),
        "embedding_dimension": store.dimension(),
    })))
}
