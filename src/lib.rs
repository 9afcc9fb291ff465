//! # llava_search (library root)
//!
//! A thin web gateway around a LLaVA-style vision-language model:
//! - Uploads are stored in a flat folder and served back (`uploads`).
//! - Prompts and images are forwarded to an OpenAI compatible inference
//!   server (`backend`).
//! - Captions are embedded with a sentence-transformer (`embeddings`) and kept
//!   in a persistent HNSW-backed collection for semantic search (`vector_store`).
//! - The HTTP surface lives in `server` and `routes`; the CLI in `commands`.
//!
//! ## Configuration discovery
//! The default config file is `config.yaml` under the per-platform config
//! directory returned by [`config_dir`], e.g.:
//!
//! - macOS: `~/Library/Application Support/org.llava-search.llava-search/config.yaml`
//! - Linux (XDG): `~/.config/llava-search/config.yaml`
//! - Windows: `C:\Users\<you>\AppData\Roaming\llava-search\llava-search\config\config.yaml`
//!
//! ## Modules
//! - [`backend`], [`commands`], [`config`], [`embeddings`], [`error`],
//!   [`routes`], [`server`], [`uploads`], [`vector_store`]

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod backend;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod routes;
pub mod server;
pub mod uploads;
pub mod vector_store;

pub use error::{GatewayError, Result};
pub use server::{AppState, start_server};

/// Return the per-platform configuration directory.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("org", "llava-search", "llava-search")`. The directory is **not** created
/// by this function.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "llava-search", "llava-search")
        .ok_or_else(|| GatewayError::Config("Unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Default location of the config file: `config_dir()/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.yaml"))
}
