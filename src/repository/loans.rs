//! Loan ledger: opens and closes loans against the copy registry

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{copies::CopiesRepository, locks::KeyedLocks};
use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
    models::{
        loan::{fine_for, Loan},
        CopyState, LoanState,
    },
};

/// Limits applied when opening and closing loans
#[derive(Debug, Clone)]
pub struct LoanRules {
    pub max_active_loans: usize,
    pub max_loan_days: i64,
    pub fine_rate: Decimal,
}

impl From<&CirculationConfig> for LoanRules {
    fn from(config: &CirculationConfig) -> Self {
        Self {
            max_active_loans: config.max_active_loans,
            max_loan_days: config.max_loan_days,
            fine_rate: config.fine_rate(),
        }
    }
}

#[derive(Clone)]
pub struct LoansRepository {
    copies: CopiesRepository,
    loans: Arc<RwLock<BTreeMap<i32, Loan>>>,
    borrower_locks: Arc<KeyedLocks<i32>>,
    next_id: Arc<AtomicI32>,
    rules: LoanRules,
}

impl LoansRepository {
    pub fn new(copies: CopiesRepository, rules: LoanRules, lock_timeout: std::time::Duration) -> Self {
        Self {
            copies,
            loans: Arc::new(RwLock::new(BTreeMap::new())),
            borrower_locks: Arc::new(KeyedLocks::new(lock_timeout)),
            next_id: Arc::new(AtomicI32::new(1)),
            rules,
        }
    }

    pub fn rules(&self) -> &LoanRules {
        &self.rules
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        self.loans
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    /// Create a new loan
    ///
    /// Every precondition is checked before anything changes, with the
    /// borrower and the copy locked (in that order).
    pub async fn open_loan(
        &self,
        borrower_id: i32,
        copy_id: i32,
        loan_date: NaiveDate,
        due_date: NaiveDate,
    ) -> AppResult<Loan> {
        let _borrower = self.borrower_locks.acquire(borrower_id, "borrower").await?;
        let mut copy = self.copies.lock(copy_id).await?;

        if copy.state != CopyState::Available {
            return Err(AppError::CopyUnavailable(copy_id));
        }

        let current = self.count_active(borrower_id).await;
        if current >= self.rules.max_active_loans {
            return Err(AppError::LoanLimitExceeded {
                current,
                max: self.rules.max_active_loans,
            });
        }

        let requested = (due_date - loan_date).num_days();
        if requested > self.rules.max_loan_days {
            return Err(AppError::DurationExceeded {
                requested,
                max: self.rules.max_loan_days,
            });
        }
        if requested < 0 {
            return Err(AppError::InvalidDueDate {
                loaned: loan_date,
                due: due_date,
            });
        }

        let loan = Loan {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            borrower_id,
            copy_id,
            loan_date,
            due_date,
            return_date: None,
            state: LoanState::Active,
            fine: Decimal::ZERO,
        };

        self.loans.write().await.insert(loan.id, loan.clone());
        copy.state = CopyState::Loaned;

        tracing::info!(
            loan_id = loan.id,
            borrower_id,
            copy_id,
            due_date = %due_date,
            "Loan opened"
        );
        Ok(loan)
    }

    /// Return a loan and fix its fine
    pub async fn close_loan(&self, loan_id: i32, return_date: NaiveDate) -> AppResult<Loan> {
        let loan = self.get_by_id(loan_id).await?;
        if loan.state == LoanState::Returned {
            return Err(AppError::AlreadyReturned(loan_id));
        }

        let mut copy = self.copies.lock(loan.copy_id).await?;
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(&loan_id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;

        // Another return may have won the race for the copy lock
        if loan.state == LoanState::Returned {
            return Err(AppError::AlreadyReturned(loan_id));
        }

        loan.state = LoanState::Returned;
        loan.return_date = Some(return_date);
        loan.fine = fine_for(loan.due_date, return_date, self.rules.fine_rate);
        copy.state = CopyState::Available;

        tracing::info!(
            loan_id,
            copy_id = loan.copy_id,
            fine = %loan.fine,
            "Loan returned"
        );
        Ok(loan.clone())
    }

    /// Count active loans of a borrower
    pub async fn count_active(&self, borrower_id: i32) -> usize {
        self.loans
            .read()
            .await
            .values()
            .filter(|loan| loan.borrower_id == borrower_id && loan.is_active())
            .count()
    }

    /// Active loans of a borrower, oldest first
    pub async fn active_loans_for(&self, borrower_id: i32) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .read()
            .await
            .values()
            .filter(|loan| loan.borrower_id == borrower_id && loan.is_active())
            .cloned()
            .collect();
        loans.sort_by_key(|loan| (loan.due_date, loan.id));
        loans
    }

    /// Every loan of a borrower, newest first
    pub async fn history_for(&self, borrower_id: i32) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .loans
            .read()
            .await
            .values()
            .filter(|loan| loan.borrower_id == borrower_id)
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.loan_date.cmp(&a.loan_date).then(b.id.cmp(&a.id)));
        loans
    }

    /// Active loans past their due date
    pub async fn overdue(&self, today: NaiveDate) -> Vec<Loan> {
        self.loans
            .read()
            .await
            .values()
            .filter(|loan| loan.is_overdue(today))
            .cloned()
            .collect()
    }

    /// Sum of fines accrued so far by a borrower's active loans
    pub async fn pending_fines(&self, borrower_id: i32, today: NaiveDate) -> Decimal {
        self.loans
            .read()
            .await
            .values()
            .filter(|loan| loan.borrower_id == borrower_id && loan.is_active())
            .map(|loan| loan.accrued_fine(today, self.rules.fine_rate))
            .sum()
    }

    pub async fn active_loan_for_copy(&self, copy_id: i32) -> Option<Loan> {
        self.loans
            .read()
            .await
            .values()
            .find(|loan| loan.copy_id == copy_id && loan.is_active())
            .cloned()
    }

    pub async fn has_open_loan_for_copy(&self, copy_id: i32) -> bool {
        self.active_loan_for_copy(copy_id).await.is_some()
    }
}
