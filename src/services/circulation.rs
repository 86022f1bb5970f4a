//! Circulation service: the single entry point for borrowing, returning
//! and reserving
//!
//! Checks that need more than one component (unpaid fines before a
//! reservation, open loans before withdrawing a book) live here. External
//! lookups always happen before any circulation lock is taken.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use super::{catalog::Catalog, fines::FineBalances, sweeper::SweeperService};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        BookAvailability, BookCopy, BorrowerSummary, CopyState, Loan, Reservation, SweepReport,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CirculationService {
    repository: Repository,
    catalog: Arc<dyn Catalog>,
    fines: Arc<dyn FineBalances>,
    clock: Arc<dyn Clock>,
    sweeper: SweeperService,
    default_loan_days: i64,
}

impl CirculationService {
    pub fn new(
        repository: Repository,
        catalog: Arc<dyn Catalog>,
        fines: Arc<dyn FineBalances>,
        clock: Arc<dyn Clock>,
        sweeper: SweeperService,
        default_loan_days: i64,
    ) -> Self {
        Self {
            repository,
            catalog,
            fines,
            clock,
            sweeper,
            default_loan_days,
        }
    }

    // ---- Loans ----

    /// Borrow a copy for the default loan period starting today
    pub async fn borrow(&self, borrower_id: i32, copy_id: i32) -> AppResult<Loan> {
        let today = self.clock.today();
        let due_date = today + Duration::days(self.default_loan_days);
        self.repository
            .loans
            .open_loan(borrower_id, copy_id, today, due_date)
            .await
    }

    /// Borrow a copy until an explicit due date
    pub async fn borrow_until(&self, borrower_id: i32, copy_id: i32, due_date: NaiveDate) -> AppResult<Loan> {
        let today = self.clock.today();
        self.repository
            .loans
            .open_loan(borrower_id, copy_id, today, due_date)
            .await
    }

    /// Return a borrowed copy
    pub async fn return_loan(&self, loan_id: i32, today: NaiveDate) -> AppResult<Loan> {
        self.repository.loans.close_loan(loan_id, today).await
    }

    /// Return a borrowed copy by its barcode
    pub async fn return_by_barcode(&self, barcode: &str, today: NaiveDate) -> AppResult<Loan> {
        let copy = self.repository.copies.get_by_barcode(barcode).await?;
        let loan = self
            .repository
            .loans
            .active_loan_for_copy(copy.id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("No active loan for copy {}", barcode)))?;
        self.return_loan(loan.id, today).await
    }

    pub async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.repository.loans.get_by_id(loan_id).await
    }

    /// Every loan of a borrower, newest first
    pub async fn loan_history(&self, borrower_id: i32) -> Vec<Loan> {
        self.repository.loans.history_for(borrower_id).await
    }

    pub async fn overdue_loans(&self) -> Vec<Loan> {
        self.repository.loans.overdue(self.clock.today()).await
    }

    pub async fn borrower_summary(&self, borrower_id: i32) -> AppResult<BorrowerSummary> {
        let outstanding_balance = self.fines.outstanding(borrower_id).await?;
        let today = self.clock.today();
        let active = self.repository.loans.active_loans_for(borrower_id).await;
        let fine_rate = self.repository.loans.rules().fine_rate;

        Ok(BorrowerSummary {
            borrower_id,
            active_loans: active.len(),
            overdue_loans: active.iter().filter(|loan| loan.is_overdue(today)).count(),
            pending_fines: active
                .iter()
                .map(|loan| loan.accrued_fine(today, fine_rate))
                .sum(),
            outstanding_balance,
        })
    }

    // ---- Reservations ----

    /// Join the waiting list of a book
    pub async fn reserve(&self, borrower_id: i32, book_id: i32) -> AppResult<Reservation> {
        self.ensure_book(book_id).await?;

        if self.has_unpaid_fine(borrower_id).await? {
            tracing::info!(borrower_id, book_id, "Reservation refused: unpaid fines");
            return Err(AppError::HasUnpaidFine(borrower_id));
        }

        self.repository.reservations.enqueue(book_id, borrower_id).await
    }

    pub async fn cancel_reservation(&self, reservation_id: i32) -> AppResult<Reservation> {
        self.repository.reservations.cancel(reservation_id).await
    }

    /// Mark a reservation as served; when to do so is the caller's policy
    pub async fn fulfill_reservation(&self, reservation_id: i32) -> AppResult<Reservation> {
        self.repository.reservations.fulfill(reservation_id).await
    }

    pub async fn get_reservation(&self, reservation_id: i32) -> AppResult<Reservation> {
        self.repository.reservations.get_by_id(reservation_id).await
    }

    /// Queued reservations of a book, by position
    pub async fn queue_snapshot(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        self.repository.reservations.peek_queue(book_id).await
    }

    pub async fn borrower_reservations(&self, borrower_id: i32) -> AppResult<Vec<Reservation>> {
        self.repository.reservations.reservations_for(borrower_id).await
    }

    /// Expire reservations queued for longer than the configured limit
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep(now).await
    }

    // ---- Copies ----

    pub async fn register_copy(&self, copy: BookCopy) -> AppResult<BookCopy> {
        self.ensure_book(copy.book_id).await?;
        self.ensure_branch(copy.branch_id).await?;
        self.repository.copies.register(copy).await
    }

    pub async fn get_copy(&self, copy_id: i32) -> AppResult<BookCopy> {
        self.repository.copies.get(copy_id).await
    }

    pub async fn set_copy_state(&self, copy_id: i32, state: CopyState) -> AppResult<BookCopy> {
        self.repository.copies.set_state(copy_id, state).await
    }

    /// Move a copy to another branch; loaned copies are allowed through
    pub async fn transfer_copy(&self, copy_id: i32, branch_id: i32) -> AppResult<BookCopy> {
        self.ensure_branch(branch_id).await?;
        self.repository.copies.transfer(copy_id, branch_id).await
    }

    pub async fn branch_inventory(&self, branch_id: i32) -> AppResult<Vec<BookCopy>> {
        self.ensure_branch(branch_id).await?;
        self.repository.copies.list_by_branch(branch_id).await
    }

    pub async fn book_availability(&self, book_id: i32) -> AppResult<BookAvailability> {
        self.ensure_book(book_id).await?;
        let copies = self.repository.copies.list_by_book(book_id).await?;
        let mut availability = BookAvailability::from_copies(book_id, &copies);
        availability.pending_reservations = self.repository.reservations.queued_count(book_id).await?;
        Ok(availability)
    }

    /// Withdraw a book from circulation and from the catalog.
    ///
    /// Refused while any copy of the book is on loan.
    pub async fn delete_book(&self, book_id: i32) -> AppResult<()> {
        self.ensure_book(book_id).await?;

        let guards = self.repository.copies.lock_book(book_id).await?;
        let mut on_loan = false;
        for copy in &guards {
            if self.repository.loans.has_open_loan_for_copy(copy.id).await {
                on_loan = true;
                break;
            }
        }
        if on_loan {
            drop(guards);
            self.repository.copies.release_book(book_id).await;
            return Err(AppError::BookHasActiveLoans(book_id));
        }
        let removed = self.repository.copies.remove_locked(guards).await;

        if let Err(e) = self.catalog.remove_book(book_id).await {
            tracing::error!(book_id, error = %e, "Catalog refused book removal, restoring copies");
            self.repository.copies.restore(book_id, removed).await;
            return Err(e);
        }
        self.repository.copies.finish_withdrawal(book_id).await;

        let cancelled = self.repository.reservations.cancel_all(book_id).await?;
        tracing::info!(
            book_id,
            copies = removed.len(),
            reservations = cancelled.len(),
            "Book withdrawn from circulation"
        );
        Ok(())
    }

    // ---- Checks ----

    async fn has_unpaid_fine(&self, borrower_id: i32) -> AppResult<bool> {
        if self.fines.outstanding(borrower_id).await? > Decimal::ZERO {
            return Ok(true);
        }
        let pending = self
            .repository
            .loans
            .pending_fines(borrower_id, self.clock.today())
            .await;
        Ok(pending > Decimal::ZERO)
    }

    async fn ensure_book(&self, book_id: i32) -> AppResult<()> {
        if self.catalog.book_exists(book_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Book with id {} not found", book_id)))
        }
    }

    async fn ensure_branch(&self, branch_id: i32) -> AppResult<()> {
        if self.catalog.branch_exists(branch_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Branch with id {} not found", branch_id)))
        }
    }
}
