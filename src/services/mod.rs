//! Business logic services

pub mod catalog;
pub mod circulation;
pub mod fines;
pub mod sweeper;

use std::sync::Arc;

use crate::{clock::Clock, config::CirculationConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub circulation: circulation::CirculationService,
    pub sweeper: sweeper::SweeperService,
}

impl Services {
    /// Create all services with the given repository and collaborators
    pub fn new(
        repository: Repository,
        config: &CirculationConfig,
        catalog: Arc<dyn catalog::Catalog>,
        fines: Arc<dyn fines::FineBalances>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sweeper = sweeper::SweeperService::new(repository.reservations.clone(), clock.clone());
        Self {
            circulation: circulation::CirculationService::new(
                repository,
                catalog,
                fines,
                clock,
                sweeper.clone(),
                config.default_loan_days,
            ),
            sweeper,
        }
    }
}
