//! Repository layer: the in-process owners of circulation state

pub mod copies;
pub mod loans;
mod locks;
pub mod reservations;

use std::sync::Arc;

use crate::{clock::Clock, config::CirculationConfig};

/// Main repository struct holding every circulation component
#[derive(Clone)]
pub struct Repository {
    pub copies: copies::CopiesRepository,
    pub loans: loans::LoansRepository,
    pub reservations: reservations::ReservationsRepository,
}

impl Repository {
    /// Create empty components configured from `config`
    pub fn new(config: &CirculationConfig, clock: Arc<dyn Clock>) -> Self {
        let lock_timeout = config.lock_timeout();
        let copies = copies::CopiesRepository::new(lock_timeout);

        Self {
            loans: loans::LoansRepository::new(
                copies.clone(),
                loans::LoanRules::from(config),
                lock_timeout,
            ),
            reservations: reservations::ReservationsRepository::new(
                clock,
                config.reservation_ttl(),
                lock_timeout,
            ),
            copies,
        }
    }
}
