//! Periodic expiration of stale reservations

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::{clock::Clock, models::SweepReport, repository::reservations::ReservationsRepository};

#[derive(Clone)]
pub struct SweeperService {
    reservations: ReservationsRepository,
    clock: Arc<dyn Clock>,
}

impl SweeperService {
    pub fn new(reservations: ReservationsRepository, clock: Arc<dyn Clock>) -> Self {
        Self { reservations, clock }
    }

    /// Run one sweep as of `now`. Per-book failures end up in the report.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.reservations.expire_stale(now).await;

        for failure in &report.failures {
            tracing::error!(book_id = failure.book_id, error = %failure.error, "Sweep failed for book");
        }
        if report.expired_count() > 0 {
            tracing::info!(
                expired = report.expired_count(),
                books = report.expired.len(),
                "Expired stale reservations"
            );
        } else {
            tracing::debug!("Sweep found no stale reservations");
        }

        report
    }

    /// Sweep every `period` until `shutdown` resolves.
    ///
    /// A sweep in progress is abandoned at the next book boundary when
    /// shutdown arrives; each book's re-pack is never split.
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(period_secs = period.as_secs(), "Reservation sweeper started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = self.sweep(self.clock.now()) => {}
                    }
                }
            }
        }
        tracing::info!("Reservation sweeper stopped");
    }
}
