//! Elidune circulation engine
//!
//! Tracks physical copies, loans and per-book reservation queues for the
//! Elidune library management system, keeping them consistent under
//! concurrent requests.

use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

use clock::Clock;
use services::{catalog::Catalog, fines::FineBalances};

/// Application state shared by every caller of the engine
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

impl AppState {
    /// Wire the repository and services together around the given collaborators
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn Catalog>,
        fines: Arc<dyn FineBalances>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let repository = repository::Repository::new(&config.circulation, clock.clone());
        let services = services::Services::new(repository, &config.circulation, catalog, fines, clock);
        Self {
            config: Arc::new(config),
            services: Arc::new(services),
        }
    }
}
