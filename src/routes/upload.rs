//! File upload endpoint and the multipart parsing shared with indexing.

use crate::server::AppState;
use crate::error::client_error;
use crate::{GatewayError, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, State, multipart::MultipartRejection},
    routing::post,
};
use serde_json::{Value, json};

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload_file))
}

/// The parts of an upload form the gateway cares about.
pub(crate) struct UploadForm {
    pub filename: String,
    pub bytes: Bytes,
    /// Optional `prompt` text field, used to override the caption prompt.
    pub prompt: Option<String>,
}

pub(crate) async fn read_upload_form(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<UploadForm> {
    let mut multipart = multipart.map_err(|e| client_error(e.status(), e.body_text()))?;
    let mut file = None;
    let mut prompt = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| client_error(e.status(), e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| client_error(e.status(), e.body_text()))?;
                file = Some((filename, bytes));
            }
            Some("prompt") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| client_error(e.status(), e.body_text()))?;
                if !text.trim().is_empty() {
                    prompt = Some(text);
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| GatewayError::BadRequest("No file part".into()))?;
    if filename.trim().is_empty() {
        return Err(GatewayError::BadRequest("No selected file".into()));
    }

    Ok(UploadForm {
        filename,
        bytes,
        prompt,
    })
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>> {
    let form = read_upload_form(multipart).await?;
    let stored = state.uploads.save(&form.filename, &form.bytes).await?;

    Ok(Json(json!({
        "success": true,
        "filename": stored.filename,
        "url": stored.url,
    })))
}
