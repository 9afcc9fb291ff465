//! Main module for the llava-search gateway binary.
//!
//! Handles logging setup, configuration loading and dispatching to the
//! subcommand given on the command line.
//!
//! # Examples
//!
//! ```sh
//! llava-search init
//! llava-search serve
//! llava-search index ~/Pictures/*.jpg
//! ```

use clap::Parser;
use llava_search::{
    AppState,
    commands::{self, Cli, Commands},
    config::{self, GatewayConfig},
    default_config_path, start_server,
};
use once_cell::sync::OnceCell;
use std::{error::Error, path::PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Resolve and load the configuration.
///
/// A missing file at the default location is not an error: the built-in
/// defaults are used so `serve` works out of the box. An explicitly given
/// path must exist.
fn load(path: Option<PathBuf>) -> Result<GatewayConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => config::load_config(path)?,
        None => {
            let path = default_config_path()?;
            if path.exists() {
                config::load_config(path)?
            } else {
                warn!(
                    "No config at {}, using defaults (run `llava-search init` to create one)",
                    path.display()
                );
                GatewayConfig::default()
            }
        }
    };
    debug!("Config loaded: {:?}", config);
    Ok(config)
}

async fn run() -> Result<(), Box<dyn Error>> {
    let Cli {
        config: config_path,
        command,
    } = Cli::parse();

    match command {
        Commands::Init => {
            let path = config_path.map_or_else(default_config_path, Ok)?;
            if config::write_default_config(&path)? {
                println!("Wrote {}", path.display());
            } else {
                println!("{} already exists, leaving it untouched", path.display());
            }
        }
        Commands::Serve { host, port } => {
            let mut gateway_config = load(config_path)?;
            if let Some(host) = host {
                gateway_config.host = host;
            }
            if let Some(port) = port {
                gateway_config.port = port;
            }
            gateway_config.validate()?;
            start_server(gateway_config).await?;
        }
        Commands::Index { paths, prompt } => {
            let state = AppState::initialize(load(config_path)?).await?;
            let report = commands::index_images(&state, &paths, prompt.as_deref(), true).await;
            for (filename, caption) in &report.indexed {
                println!("{filename}: {caption}");
            }
            for (path, reason) in &report.failed {
                eprintln!("failed {}: {}", path.display(), reason);
            }
            info!(
                "Indexed {} image(s), {} failed",
                report.indexed.len(),
                report.failed.len()
            );
        }
        Commands::Search { query, n_results } => {
            let state = AppState::initialize(load(config_path)?).await?;
            let store = state.store.clone();
            let hits =
                tokio::task::spawn_blocking(move || store.blocking_read().search(&query, n_results))
                    .await??;
            if hits.is_empty() {
                println!("No matches.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. {:.1}%  {}\n   {}",
                    rank + 1,
                    hit.similarity * 100.0,
                    hit.image_path,
                    hit.caption
                );
            }
        }
        Commands::Stats => {
            let state = AppState::initialize(load(config_path)?).await?;
            let store = state.store.read().await;
            println!(
                "collection {}: {} image(s), {}-d embeddings",
                store.collection(),
                store.count(),
                store.dimension()
            );
        }
    }

    Ok(())
}
