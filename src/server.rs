use crate::backend::{OpenAiVisionBackend, VisionBackend};
use crate::config::GatewayConfig;
use crate::embeddings::{Embedder, SentenceEmbeddingsModel};
use crate::error::{GatewayError, Result};
use crate::routes::{chat_routes, health_routes, image_routes, upload_routes};
use crate::uploads::{StoredUpload, UPLOADS_ROUTE, UploadDir};
use crate::vector_store::CaptionStore;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub backend: Arc<dyn VisionBackend>,
    pub store: Arc<RwLock<CaptionStore>>,
    pub uploads: UploadDir,
}

impl AppState {
    /// Wire up state from already constructed parts.
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn VisionBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let uploads = UploadDir::new(&config.upload_dir)?;
        let store = CaptionStore::open(&config.db_dir, &config.collection, embedder)?;
        Ok(Self {
            config: Arc::new(config),
            backend,
            store: Arc::new(RwLock::new(store)),
            uploads,
        })
    }

    /// Build production state: the remote vision backend plus the sentence
    /// embedding model, which is downloaded on first run.
    pub async fn initialize(config: GatewayConfig) -> Result<Self> {
        let backend: Arc<dyn VisionBackend> = Arc::new(OpenAiVisionBackend::new(&config)?);

        let (model_id, revision) = (
            config.embedding_model.clone(),
            config.embedding_revision.clone(),
        );
        let embedder: Arc<dyn Embedder> = Arc::new(
            tokio::task::spawn_blocking(move || SentenceEmbeddingsModel::load(&model_id, &revision))
                .await??,
        );

        tokio::task::spawn_blocking(move || AppState::new(config, backend, embedder)).await?
    }

    /// Caption a stored upload and add the caption to the collection.
    ///
    /// `prompt` replaces the configured caption prompt when given. Returns the caption.
    pub async fn caption_and_index(
        &self,
        stored: &StoredUpload,
        prompt: Option<&str>,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        let caption = match prompt {
            Some(prompt) => {
                self.backend
                    .chat(prompt, std::slice::from_ref(&stored.path))
                    .await?
            }
            None => self.backend.caption(&stored.path).await?,
        };
        tracing::info!("Captioned {}: {}", stored.filename, caption);

        metadata.insert("url".to_string(), stored.url.clone());
        let store = self.store.clone();
        let (filename, text) = (stored.filename.clone(), caption.clone());
        tokio::task::spawn_blocking(move || {
            store
                .blocking_write()
                .add_image(&filename, &text, Some(metadata))
        })
        .await??;

        Ok(caption)
    }
}

/// The complete application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let max_body = state.config.max_upload_bytes;
    let uploads = ServeDir::new(state.uploads.root());
    let static_dir = state.config.static_dir.clone();

    let mut app = Router::new()
        .merge(upload_routes())
        .merge(chat_routes())
        .merge(image_routes())
        .with_state(state)
        .merge(health_routes())
        .nest_service(UPLOADS_ROUTE, uploads);

    if let Some(dir) = static_dir {
        tracing::info!("Serving static assets from: {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let (host, port) = (config.host.clone(), config.port);
    let state = AppState::initialize(config).await?;
    {
        let store = state.store.read().await;
        tracing::info!(
            "Collection {} ready with {} images",
            store.collection(),
            store.count()
        );
    }

    let app = router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| GatewayError::Config(format!("Cannot bind {host}:{port}: {e}")))?;

    tracing::info!("Starting web server on http://{}:{}", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(GatewayError::Io)?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
