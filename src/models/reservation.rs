//! Reservation (place in a book's waiting list) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::enums::ReservationState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i32,
    pub borrower_id: i32,
    pub book_id: i32,
    pub queued_at: DateTime<Utc>,
    pub state: ReservationState,
    /// 1-based rank among the book's queued reservations.
    /// Terminal reservations keep the last rank they held.
    pub position: u32,
}

impl Reservation {
    pub fn is_queued(&self) -> bool {
        self.state == ReservationState::Queued
    }
}

/// A book whose queue could not be swept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub book_id: i32,
    pub error: String,
}

/// Outcome of one expiration sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired reservation ids per book, in the order they were expired
    pub expired: BTreeMap<i32, Vec<i32>>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn expired_count(&self) -> usize {
        self.expired.values().map(Vec::len).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
