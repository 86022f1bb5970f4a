//! State enums for copies, loans and reservations

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CopyState
// ---------------------------------------------------------------------------

/// Shelf state of a physical copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CopyState {
    #[default]
    Available,
    Loaned,
    Maintenance,
}

impl std::fmt::Display for CopyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CopyState::Available => "available",
            CopyState::Loaned => "loaned",
            CopyState::Maintenance => "maintenance",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// LoanState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanState {
    Active,
    Returned,
}

impl std::fmt::Display for LoanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanState::Active => write!(f, "active"),
            LoanState::Returned => write!(f, "returned"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReservationState
// ---------------------------------------------------------------------------

/// Reservation lifecycle; everything but `Queued` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Queued,
    Fulfilled,
    Cancelled,
    Expired,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Queued)
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReservationState::Queued => "queued",
            ReservationState::Fulfilled => "fulfilled",
            ReservationState::Cancelled => "cancelled",
            ReservationState::Expired => "expired",
        };
        write!(f, "{}", label)
    }
}
