mod config;
mod core;
mod db;
mod providers;
mod scheduler;
mod vetting;

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::pipeline::Pipeline;
use crate::db::SharedCatalog;
use crate::providers::chain_rpc::ChainRpcClient;
use crate::providers::metadata::MetadataClient;
use crate::providers::pair_index::PairIndexClient;
use crate::providers::Provider;
use crate::scheduler::Scheduler;
use crate::vetting::Dispatcher;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mintradar=info".parse().unwrap()),
        )
        .init();

    tracing::info!("📡 MintRadar starting...");

    // Load configuration
    let config = Config::load("config.toml");
    tracing::info!("Config: {:?}", config);

    // Open the listing catalog
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }
    let db = SharedCatalog::open(db_path).expect("Failed to open catalog database");
    tracing::info!("Catalog database opened at {}", config.database.path);

    // Provider clients, in merge priority order: the metadata service is
    // the richest source, the pair index fills market fields, the chain
    // node settles authority flags.
    let pair_index = Arc::new(PairIndexClient::new(&config.providers.pair_index));
    let providers: Vec<Arc<dyn Provider>> = vec![
        Arc::new(MetadataClient::new(&config.providers.metadata)),
        pair_index.clone(),
        Arc::new(ChainRpcClient::new(&config.providers.chain_rpc)),
    ];
    tracing::info!("Provider clients configured for chain {}", config.providers.chain);

    // Vetting dispatcher and evaluation pipeline
    let dispatcher = Dispatcher::new(&config.vetting, config.tiers);
    let pipeline = Pipeline::new(providers, dispatcher, db.clone(), config.gate.min_age_days);

    // Periodic cycles
    let scheduler = Scheduler::new(pipeline, pair_index, db.clone(), &config);
    scheduler.start().await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
    }

    scheduler.stop().await;
    if let Ok(count) = db.listing_count() {
        tracing::info!("Catalog holds {count} listings, shutting down");
    }
}
