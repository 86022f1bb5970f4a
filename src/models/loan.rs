//! Loan (borrow) model and related types

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::LoanState;

/// Borrowing of one copy by one borrower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: i32,
    pub borrower_id: i32,
    pub copy_id: i32,
    pub loan_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub state: LoanState,
    /// Zero while active, fixed at return
    pub fine: Decimal,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.state == LoanState::Active
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_active() && today > self.due_date
    }

    /// Fine this loan would owe if it were returned on `today`
    pub fn accrued_fine(&self, today: NaiveDate, rate: Decimal) -> Decimal {
        match self.state {
            LoanState::Active => fine_for(self.due_date, today, rate),
            LoanState::Returned => self.fine,
        }
    }
}

/// Late fine: whole days past the due date times the daily rate
pub fn fine_for(due_date: NaiveDate, return_date: NaiveDate, rate: Decimal) -> Decimal {
    let days_late = (return_date - due_date).num_days();
    if days_late > 0 {
        Decimal::from(days_late) * rate
    } else {
        Decimal::ZERO
    }
}

/// Loan standing of a borrower
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowerSummary {
    pub borrower_id: i32,
    pub active_loans: usize,
    pub overdue_loans: usize,
    /// Fines accrued so far by active loans
    pub pending_fines: Decimal,
    /// Balance reported by the fines collaborator
    pub outstanding_balance: Decimal,
}

impl BorrowerSummary {
    pub fn has_unpaid_fine(&self) -> bool {
        self.pending_fines > Decimal::ZERO || self.outstanding_balance > Decimal::ZERO
    }
}
