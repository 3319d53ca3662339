mod agent;
mod api;
mod filter;
mod models;
mod utils;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::client::{AgentDirectory, HttpAgentClient, HttpDirectoryClient};
use crate::agent::registry::AgentRegistry;
use crate::api::routes;
use crate::filter::presets::FilterPresetStore;
use crate::filter::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use crate::models::config::AppConfig;
use crate::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Controller for remote RustShark capture agents with a REST API")]
struct Args {
    /// JSON configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Address for the REST API server
    #[clap(long)]
    bind: Option<String>,

    /// Port for the REST API server
    #[clap(short, long)]
    port: Option<u16>,

    /// Base URL of the agent directory server
    #[clap(short, long)]
    directory: Option<String>,

    /// File for saved filter presets (in memory when unset)
    #[clap(long)]
    presets: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long)]
    log_level: Option<String>,
}

impl Args {
    /// Config file values with command line flags on top
    fn into_config(self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(directory) = self.directory {
            config.directory_url = Some(directory);
        }
        if let Some(presets) = self.presets {
            config.presets_path = Some(presets);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config()?;

    logging::init_logger(logging::get_log_level(&config.log_level));

    info!("Starting RustShark Fleet v{}", env!("CARGO_PKG_VERSION"));

    let transport = Arc::new(
        HttpAgentClient::new(config.request_timeout()).context("Failed to build agent HTTP client")?,
    );
    let directory: Option<Arc<dyn AgentDirectory>> = match &config.directory_url {
        Some(url) => {
            info!("Using agent directory at {}", url);
            Some(Arc::new(
                HttpDirectoryClient::new(url.clone(), config.request_timeout())
                    .context("Failed to build directory HTTP client")?,
            ))
        }
        None => {
            warn!("No directory server configured, only static agents will be managed");
            None
        }
    };

    let backend: Arc<dyn KeyValueStore> = match &config.presets_path {
        Some(path) => {
            let store = JsonFileStore::open(path).context(format!("Failed to open preset file {:?}", path))?;
            info!("Storing filter presets in {:?}", store.path());
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };
    let presets = web::Data::new(FilterPresetStore::new(backend));

    let registry = Arc::new(AgentRegistry::new(transport, directory, config.registry_settings()));
    for record in &config.static_agents {
        registry.add_static(record);
    }
    if registry.is_empty() && config.directory_url.is_none() {
        warn!("No static agents and no directory configured, nothing to manage");
    } else {
        info!("{} static agent(s) registered", registry.len());
    }
    // first tick runs immediately and loads the roster
    let refresh = registry.spawn_refresh_loop(config.directory_refresh());

    let app_state = web::Data::new(registry.clone());

    info!("Starting RustShark Fleet API server on {}:{}", config.bind, config.port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(presets.clone())
            .configure(routes::configure)
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await?;

    refresh.stop().await;
    registry.shutdown().await;
    info!("Shut down");

    Ok(())
}
