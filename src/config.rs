//! This module provides functionality for loading and handling the gateway's configuration.
//!
//! It defines the [`GatewayConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//! Every field has a default, so a config file only needs the keys it changes.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use llava_search::config::{GatewayConfig, load_config};
//!
//! let config: GatewayConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::*;

use crate::error::{GatewayError, Result};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Represents the gateway's configuration.
///
/// Holds the inference server connection, the generation parameters sent with
/// every request, where uploads and the caption collection live on disk, and
/// the address the HTTP server binds to.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// The API key used to authenticate requests to the inference server.
    pub api_key: String,

    /// The base URL of the OpenAI compatible inference server.
    pub api_base: String,

    /// The name of the vision-language model to be used for generating responses.
    pub model: String,

    /// Maximum number of new tokens per response.
    pub max_tokens: u32,

    /// Sampling temperature. Ignored (sent as 0) when `do_sample` is false.
    pub temperature: f32,

    /// Sample with `temperature`; when false, decoding is greedy.
    pub do_sample: bool,

    /// Prompt used when an image is captioned for indexing.
    pub caption_prompt: String,

    /// Optional system message placed before every request.
    pub system_prompt: Option<String>,

    /// Timeout for a single request to the inference server, in seconds.
    pub request_timeout_secs: u64,

    /// Address the HTTP server binds to.
    pub host: String,

    /// Port the HTTP server listens on.
    pub port: u16,

    /// Folder uploaded images are written to and served from.
    pub upload_dir: PathBuf,

    /// Folder holding the persisted caption collection.
    pub db_dir: PathBuf,

    /// Name of the caption collection inside `db_dir`.
    pub collection: String,

    /// Hugging Face model id of the sentence embedding model.
    pub embedding_model: String,

    /// Git revision (branch, tag or commit) of `embedding_model` to download.
    pub embedding_revision: String,

    /// Largest accepted request body; bigger uploads are refused with 413.
    pub max_upload_bytes: usize,

    /// Directory with the web UI, served at `/` when set.
    pub static_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "http://localhost:8080/v1".to_string(),
            model: "lmms-lab/llava-onevision-qwen2-0.5b-si".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            do_sample: true,
            caption_prompt: "Describe this image in detail.".to_string(),
            system_prompt: None,
            request_timeout_secs: 300,
            host: "127.0.0.1".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            db_dir: PathBuf::from("chroma_db"),
            collection: "image_captions".to_string(),
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            embedding_revision: "main".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            static_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Reject values that would only fail later, at request time.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::Config("model must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GatewayError::Config("port must be non-zero".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(GatewayError::Config(
                "max_upload_bytes must be non-zero".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::Config(format!(
                "temperature {} is outside 0..=2",
                self.temperature
            )));
        }
        if self.collection.trim().is_empty() {
            return Err(GatewayError::Config("collection must not be empty".into()));
        }
        Ok(())
    }

    /// Temperature actually sent to the server.
    pub fn effective_temperature(&self) -> f32 {
        if self.do_sample { self.temperature } else { 0.0 }
    }
}

/// Loads the gateway's configuration from a YAML file.
///
/// This function reads the file at the given path, parses it as YAML, and
/// constructs a [`GatewayConfig`] from it. Missing keys take their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML, or fails
/// [`GatewayConfig::validate`].
pub fn load_config(file: impl AsRef<Path>) -> Result<GatewayConfig> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: GatewayConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Write the default configuration to `path`, creating parent directories.
///
/// An existing file is left untouched; returns `false` in that case.
pub fn write_default_config(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if path.exists() {
        info!("Config already exists at {}", path.display());
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&GatewayConfig::default())?;
    fs::write(path, yaml)?;
    info!("Created config file: {}", path.display());
    Ok(true)
}
