//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! a [`Commands`] enum for the available subcommands, and the offline batch
//! operations (`index`) that reuse the gateway's state outside the HTTP server.
//!
//! # Examples
//!
//! ```sh
//! llava-search init
//! llava-search serve --port 5000
//! llava-search index photos/*.jpg
//! llava-search search "a dog on the beach" -n 3
//! ```

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::server::AppState;
use crate::Result;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Auto)]
pub struct Cli {
    /// Path to the YAML config file. Defaults to `<config dir>/config.yaml`.
    #[arg(long, short = 'c', global = true, env = "LLAVA_SEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config file (never overwrites an existing one).
    Init,

    /// Run the HTTP gateway.
    #[clap(name = "serve", alias = "s")]
    Serve {
        /// Override the configured bind address.
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port.
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Caption local images and add them to the collection.
    #[clap(name = "index", alias = "i")]
    Index {
        /// Image files to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Prompt to caption with instead of the configured `caption_prompt`.
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Search indexed captions.
    Search {
        query: String,

        #[arg(short = 'n', long = "results", default_value_t = 10)]
        n_results: usize,
    },

    /// Print collection statistics.
    Stats,
}

/// Outcome of a batch [`index_images`] run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub indexed: Vec<(String, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Copy each image into the upload folder, caption it and index the caption.
///
/// Failures are collected per path and do not stop the batch.
pub async fn index_images(
    state: &AppState,
    paths: &[PathBuf],
    prompt: Option<&str>,
    show_progress: bool,
) -> IndexReport {
    let bar = if show_progress {
        let bar = ProgressBar::new(paths.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut report = IndexReport::default();
    for path in paths {
        bar.set_message(path.display().to_string());
        match index_one(state, path, prompt).await {
            Ok((filename, caption)) => {
                info!("Indexed {}", filename);
                report.indexed.push((filename, caption));
            }
            Err(e) => {
                error!("Failed to index {}: {}", path.display(), e);
                report.failed.push((path.clone(), e.to_string()));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    report
}

async fn index_one(
    state: &AppState,
    path: &Path,
    prompt: Option<&str>,
) -> Result<(String, String)> {
    let stored = state.uploads.import(path).await?;
    let metadata = BTreeMap::from([("source".to_string(), path.display().to_string())]);
    let caption = state.caption_and_index(&stored, prompt, metadata).await?;

    Ok((stored.filename, caption))
}
