//! Elidune circulation daemon
//!
//! Loads the catalog seed and runs the reservation sweeper until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elidune_circulation::{
    clock::SystemClock,
    config::AppConfig,
    services::{
        catalog::{CatalogSeed, InMemoryCatalog},
        fines::NoOutstandingFines,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("elidune_circulation={}", config.logging.level).into());
    let json = config.logging.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting Elidune circulation engine v{}", env!("CARGO_PKG_VERSION"));

    let seed = match &config.catalog.seed_path {
        Some(path) => CatalogSeed::load(path).await?,
        None => {
            tracing::warn!("No catalog seed configured, starting with an empty catalog");
            CatalogSeed::default()
        }
    };
    let catalog: Arc<InMemoryCatalog> = Arc::new(seed.catalog());

    let interval = config.sweeper.interval();
    let state = AppState::new(config, catalog, Arc::new(NoOutstandingFines), Arc::new(SystemClock));

    let circulation = &state.services.circulation;
    let copy_count = seed.copies.len();
    for copy in seed.copies {
        circulation.register_copy(copy).await?;
    }
    tracing::info!(
        books = seed.books.len(),
        branches = seed.branches.len(),
        copies = copy_count,
        "Catalog loaded"
    );

    state
        .services
        .sweeper
        .run(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
