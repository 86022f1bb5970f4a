//! Data models for the circulation engine

pub mod copy;
pub mod enums;
pub mod loan;
pub mod reservation;

// Re-export commonly used types
pub use copy::{BookAvailability, BookCopy, BranchAvailability};
pub use enums::{CopyState, LoanState, ReservationState};
pub use loan::{BorrowerSummary, Loan};
pub use reservation::{Reservation, SweepFailure, SweepReport};
