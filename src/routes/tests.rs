use crate::backend::testing::FakeBackend;
use crate::config::GatewayConfig;
use crate::embeddings::testing::HashEmbedder;
use crate::server::{AppState, router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----llava-search-test";

struct Harness {
    _dir: TempDir,
    app: Router,
    backend: Arc<FakeBackend>,
    config: GatewayConfig,
}

fn harness_with(backend: FakeBackend) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        upload_dir: dir.path().join("uploads"),
        db_dir: dir.path().join("db"),
        max_upload_bytes: 1024,
        ..GatewayConfig::default()
    };
    let backend = Arc::new(backend);
    let state = AppState::new(
        config.clone(),
        backend.clone(),
        Arc::new(HashEmbedder::new(64)),
    )
    .unwrap();
    Harness {
        _dir: dir,
        app: router(state),
        backend,
        config,
    }
}

fn harness() -> Harness {
    harness_with(FakeBackend::default())
}

fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn index(app: &Router, filename: &str) -> Value {
    let (status, body) = send(
        app,
        multipart_request("/api/index-image", &[("file", Some(filename), b"img")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

#[tokio::test]
async fn health_reports_healthy() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn upload_saves_file_and_serves_it_back() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request("/upload", &[("file", Some("cat.png"), b"meow")]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["filename"], "cat.png");
    assert_eq!(body["url"], "/uploads/cat.png");
    assert_eq!(
        std::fs::read(h.config.upload_dir.join("cat.png")).unwrap(),
        b"meow"
    );

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/uploads/cat.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"meow");
}

#[tokio::test]
async fn upload_without_file_part_is_rejected() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request("/upload", &[("other", None, b"x")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"success": false, "error": "No file part"}));
}

#[tokio::test]
async fn upload_with_empty_filename_is_rejected() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request("/upload", &[("file", Some(""), b"x")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No selected file");
}

#[tokio::test]
async fn upload_cannot_escape_upload_folder() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request("/upload", &[("file", Some("../../evil.sh"), b"x")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "evil.sh");
    assert!(h.config.upload_dir.join("evil.sh").is_file());
}

#[tokio::test]
async fn oversized_upload_is_refused() {
    let h = harness();
    let big = vec![0u8; 4096];
    let (status, body) = send(
        &h.app,
        multipart_request("/upload", &[("file", Some("big.bin"), big.as_slice())]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    assert!(!h.config.upload_dir.join("big.bin").exists());
}

#[tokio::test]
async fn chat_passes_only_existing_images_to_backend() {
    let h = harness();
    send(
        &h.app,
        multipart_request("/upload", &[("file", Some("a.jpg"), b"a")]),
    )
    .await;

    let (status, body) = send(
        &h.app,
        json_request(
            "/chat",
            json!({"prompt": "compare these", "image_paths": ["a.jpg", "ghost.jpg"]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["response"], "answer to 'compare these' with 1 image(s)");

    let calls = h.backend.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec![h.config.upload_dir.join("a.jpg")]);
}

#[tokio::test]
async fn chat_without_images_is_text_only() {
    let h = harness();
    let (status, body) = send(&h.app, json_request("/chat", json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "answer to 'hi' with 0 image(s)");
}

#[tokio::test]
async fn chat_backend_failure_returns_500_envelope() {
    let h = harness_with(FakeBackend {
        fail: true,
        ..FakeBackend::default()
    });
    let (status, body) = send(&h.app, json_request("/chat", json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("model offline"));
}

#[tokio::test]
async fn malformed_json_gets_error_envelope() {
    let h = harness();
    let request = Request::post("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn index_then_search_finds_the_image() {
    let h = harness();
    let indexed = index(&h.app, "sleeping_cat.jpg").await;
    assert_eq!(indexed["caption"], "a photo of sleeping cat");
    assert_eq!(indexed["url"], "/uploads/sleeping_cat.jpg");
    index(&h.app, "red-sports-car.jpg").await;

    let (status, body) = send(
        &h.app,
        json_request("/api/search-images", json!({"query": "cat", "n_results": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["query"], "cat");
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(body["count"], results.len());
    assert_eq!(results[0]["image_path"], "sleeping_cat.jpg");
    assert_eq!(results[0]["caption"], "a photo of sleeping cat");
    let similarity = results[0]["similarity"].as_f64().unwrap();
    let distance = results[0]["distance"].as_f64().unwrap();
    assert!((similarity - (1.0 - distance)).abs() < 1e-5);
}

#[tokio::test]
async fn index_with_custom_prompt_uses_chat() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        multipart_request(
            "/api/index-image",
            &[
                ("prompt", None, b"List the objects"),
                ("file", Some("desk.jpg"), b"img"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["caption"], "answer to 'List the objects' with 1 image(s)");
}

#[tokio::test]
async fn search_on_empty_database_returns_no_results() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        json_request("/api/search-images", json!({"query": "anything"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"], json!([]));
}

#[tokio::test]
async fn search_requires_a_query() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        json_request("/api/search-images", json!({"query": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn listing_stats_delete_and_clear() {
    let h = harness();
    index(&h.app, "one.jpg").await;
    index(&h.app, "two.jpg").await;

    let (_, all) = send(
        &h.app,
        Request::get("/api/get-all-images").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(all["count"], 2);
    assert_eq!(all["results"][0]["image_path"], "one.jpg");

    let (_, stats) = send(&h.app, Request::get("/api/stats").body(Body::empty()).unwrap()).await;
    assert_eq!(stats["total_images"], 2);
    assert_eq!(stats["collection"], "image_captions");
    assert_eq!(stats["embedding_dimension"], 64);

    let (status, deleted) = send(
        &h.app,
        json_request("/api/delete-image", json!({"image_path": "one.jpg"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (_, again) = send(
        &h.app,
        json_request("/api/delete-image", json!({"image_path": "one.jpg"})),
    )
    .await;
    assert_eq!(again["deleted"], false);

    let (status, cleared) = send(
        &h.app,
        Request::post("/api/clear-database").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["success"], true);

    let (_, stats) = send(&h.app, Request::get("/api/stats").body(Body::empty()).unwrap()).await;
    assert_eq!(stats["total_images"], 0);
}
