//! Chat endpoint: a prompt plus optional previously uploaded images.

use crate::server::AppState;
use crate::{GatewayError, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};

/// Request body for chat messages
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: String,
    /// File names relative to the upload folder.
    #[serde(default)]
    pub image_paths: Vec<String>,
}

pub fn chat_routes() -> Router<AppState> {
    Router::new().route("/chat", post(chat_handler))
}

async fn chat_handler(
    State(state): State<AppState>,
    request: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = request.map_err(|e| GatewayError::BadRequest(e.body_text()))?;

    if request.prompt.trim().is_empty() {
        return Err(GatewayError::BadRequest("Prompt cannot be empty".into()));
    }

    let images = state.uploads.resolve_existing(&request.image_paths);
    if images.len() < request.image_paths.len() {
        tracing::warn!(
            "Dropped {} unknown image(s) from chat request",
            request.image_paths.len() - images.len()
        );
    }

    let response = state.backend.chat(&request.prompt, &images).await?;

    Ok(Json(json!({
        "success": true,
        "response": response,
    })))
}
