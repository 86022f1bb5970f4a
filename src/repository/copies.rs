//! Copy registry: per-copy state and branch assignment

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::locks::lock_within;
use crate::{
    error::{AppError, AppResult},
    models::{BookCopy, CopyState},
};

struct IndexEntry {
    handle: Arc<Mutex<BookCopy>>,
    book_id: i32,
    /// Mirrors the record; only updated while the copy lock is held
    branch_id: i32,
}

#[derive(Default)]
struct CopyIndex {
    by_id: HashMap<i32, IndexEntry>,
    by_barcode: HashMap<String, i32>,
    /// Books whose copies are locked for removal
    withdrawing: HashSet<i32>,
    /// Books removed from circulation
    withdrawn: HashSet<i32>,
}

impl CopyIndex {
    fn insert(&mut self, copy: BookCopy) -> AppResult<()> {
        if self.withdrawing.contains(&copy.book_id) {
            return Err(AppError::Busy(format!("book {} is being withdrawn", copy.book_id)));
        }
        if self.withdrawn.contains(&copy.book_id) {
            return Err(AppError::NotFound(format!("Book with id {} not found", copy.book_id)));
        }
        if self.by_id.contains_key(&copy.id) {
            return Err(AppError::Conflict(format!("Copy {} already exists", copy.id)));
        }
        if self.by_barcode.contains_key(&copy.barcode) {
            return Err(AppError::Conflict(format!(
                "Barcode {} is already in use",
                copy.barcode
            )));
        }

        self.by_barcode.insert(copy.barcode.clone(), copy.id);
        self.by_id.insert(
            copy.id,
            IndexEntry {
                book_id: copy.book_id,
                branch_id: copy.branch_id,
                handle: Arc::new(Mutex::new(copy)),
            },
        );
        Ok(())
    }

    /// Handles of the matching copies, in id order
    fn handles<F>(&self, filter: F) -> Vec<(i32, Arc<Mutex<BookCopy>>)>
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let mut handles: Vec<(i32, Arc<Mutex<BookCopy>>)> = self
            .by_id
            .iter()
            .filter(|(_, entry)| filter(entry))
            .map(|(id, entry)| (*id, entry.handle.clone()))
            .collect();
        handles.sort_unstable_by_key(|(id, _)| *id);
        handles
    }
}

#[derive(Clone)]
pub struct CopiesRepository {
    index: Arc<RwLock<CopyIndex>>,
    lock_timeout: Duration,
}

impl CopiesRepository {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            index: Arc::new(RwLock::new(CopyIndex::default())),
            lock_timeout,
        }
    }

    /// Register a copy created by catalog management
    pub async fn register(&self, copy: BookCopy) -> AppResult<BookCopy> {
        if copy.state == CopyState::Loaned {
            return Err(AppError::InvalidTransition(format!(
                "Copy {} cannot be registered as loaned",
                copy.id
            )));
        }

        self.index.write().await.insert(copy.clone())?;
        Ok(copy)
    }

    /// Lock a copy for the duration of one state transition
    pub(crate) async fn lock(&self, copy_id: i32) -> AppResult<OwnedMutexGuard<BookCopy>> {
        let handle = self.handle(copy_id).await?;
        let guard = lock_within(handle.clone(), self.lock_timeout, format!("copy {}", copy_id)).await?;

        // The copy may have been removed while we were waiting
        match self.index.read().await.by_id.get(&copy_id) {
            Some(current) if Arc::ptr_eq(&current.handle, &handle) => Ok(guard),
            _ => Err(not_found(copy_id)),
        }
    }

    pub async fn get(&self, copy_id: i32) -> AppResult<BookCopy> {
        Ok(self.lock(copy_id).await?.clone())
    }

    pub async fn get_by_barcode(&self, barcode: &str) -> AppResult<BookCopy> {
        let copy_id = self
            .index
            .read()
            .await
            .by_barcode
            .get(barcode)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Copy with barcode {} not found", barcode)))?;
        self.get(copy_id).await
    }

    /// Explicit state change (maintenance in and out)
    pub async fn set_state(&self, copy_id: i32, new_state: CopyState) -> AppResult<BookCopy> {
        let mut copy = self.lock(copy_id).await?;

        match (copy.state, new_state) {
            (_, CopyState::Loaned) => {
                return Err(AppError::InvalidTransition(format!(
                    "Copy {} can only become loaned through a loan",
                    copy_id
                )));
            }
            (CopyState::Loaned, _) => {
                return Err(AppError::InvalidTransition(format!(
                    "Copy {} is on loan; return the loan before setting it {}",
                    copy_id, new_state
                )));
            }
            _ => {}
        }

        let previous = copy.state;
        copy.state = new_state;
        tracing::info!(copy_id, from = %previous, to = %new_state, "Copy state changed");
        Ok(copy.clone())
    }

    /// Move a copy to another branch. The branch must already be known to exist.
    pub async fn transfer(&self, copy_id: i32, new_branch_id: i32) -> AppResult<BookCopy> {
        let mut copy = self.lock(copy_id).await?;

        if copy.state == CopyState::Loaned {
            tracing::warn!(copy_id, new_branch_id, "Transferring a copy that is on loan");
        }

        let previous = copy.branch_id;
        copy.branch_id = new_branch_id;
        if let Some(entry) = self.index.write().await.by_id.get_mut(&copy_id) {
            entry.branch_id = new_branch_id;
        }
        tracing::info!(copy_id, from = previous, to = new_branch_id, "Copy transferred");
        Ok(copy.clone())
    }

    pub async fn list_by_book(&self, book_id: i32) -> AppResult<Vec<BookCopy>> {
        let handles = self.index.read().await.handles(|entry| entry.book_id == book_id);
        self.snapshot(handles, |copy| copy.book_id == book_id).await
    }

    pub async fn list_by_branch(&self, branch_id: i32) -> AppResult<Vec<BookCopy>> {
        let handles = self.index.read().await.handles(|entry| entry.branch_id == branch_id);
        self.snapshot(handles, |copy| copy.branch_id == branch_id).await
    }

    /// Lock every copy of a book, in id order, and refuse new copies of it
    /// until the withdrawal is released, restored or finished
    pub(crate) async fn lock_book(&self, book_id: i32) -> AppResult<Vec<OwnedMutexGuard<BookCopy>>> {
        let ids: Vec<i32> = {
            let mut index = self.index.write().await;
            if !index.withdrawing.insert(book_id) {
                return Err(AppError::Busy(format!("book {} is being withdrawn", book_id)));
            }
            index
                .handles(|entry| entry.book_id == book_id)
                .into_iter()
                .map(|(id, _)| id)
                .collect()
        };

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            match self.lock(id).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    drop(guards);
                    self.release_book(book_id).await;
                    return Err(e);
                }
            }
        }
        Ok(guards)
    }

    /// Give up a withdrawal started by `lock_book`
    pub(crate) async fn release_book(&self, book_id: i32) {
        self.index.write().await.withdrawing.remove(&book_id);
    }

    /// Remove copies whose locks are held by the caller
    pub(crate) async fn remove_locked(&self, guards: Vec<OwnedMutexGuard<BookCopy>>) -> Vec<BookCopy> {
        let mut index = self.index.write().await;
        guards
            .into_iter()
            .map(|guard| {
                index.by_id.remove(&guard.id);
                index.by_barcode.remove(&guard.barcode);
                guard.clone()
            })
            .collect()
    }

    /// Put removed copies back and end the withdrawal
    pub(crate) async fn restore(&self, book_id: i32, copies: Vec<BookCopy>) {
        let mut index = self.index.write().await;
        index.withdrawing.remove(&book_id);
        for copy in copies {
            let copy_id = copy.id;
            if let Err(e) = index.insert(copy) {
                tracing::warn!(book_id, copy_id, error = %e, "Could not restore copy");
            }
        }
    }

    /// The book is gone for good; later registrations for it are refused
    pub(crate) async fn finish_withdrawal(&self, book_id: i32) {
        let mut index = self.index.write().await;
        index.withdrawing.remove(&book_id);
        index.withdrawn.insert(book_id);
    }

    async fn handle(&self, copy_id: i32) -> AppResult<Arc<Mutex<BookCopy>>> {
        self.index
            .read()
            .await
            .by_id
            .get(&copy_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| not_found(copy_id))
    }

    /// Lock only the given copies; the record is authoritative once locked
    async fn snapshot<F>(&self, handles: Vec<(i32, Arc<Mutex<BookCopy>>)>, filter: F) -> AppResult<Vec<BookCopy>>
    where
        F: Fn(&BookCopy) -> bool,
    {
        let mut copies = Vec::with_capacity(handles.len());
        for (copy_id, handle) in handles {
            let copy = lock_within(handle, self.lock_timeout, format!("copy {}", copy_id)).await?;
            if filter(&copy) {
                copies.push(copy.clone());
            }
        }
        Ok(copies)
    }
}

fn not_found(copy_id: i32) -> AppError {
    AppError::NotFound(format!("Copy with id {} not found", copy_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> CopiesRepository {
        CopiesRepository::new(Duration::from_millis(50))
    }

    async fn mark_loaned(copies: &CopiesRepository, copy_id: i32) {
        let mut copy = copies.lock(copy_id).await.unwrap();
        copy.state = CopyState::Loaned;
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();

        let err = copies.register(BookCopy::new(1, "A-2", 10, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = copies.register(BookCopy::new(2, "A-1", 10, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        assert_eq!(copies.get_by_barcode("A-1").await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_loaned_copy_cannot_go_to_maintenance() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        mark_loaned(&copies, 1).await;

        let err = copies.set_state(1, CopyState::Maintenance).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(copies.get(1).await.unwrap().state, CopyState::Loaned);
    }

    #[tokio::test]
    async fn test_maintenance_round_trip() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();

        let copy = copies.set_state(1, CopyState::Maintenance).await.unwrap();
        assert_eq!(copy.state, CopyState::Maintenance);
        let copy = copies.set_state(1, CopyState::Available).await.unwrap();
        assert_eq!(copy.state, CopyState::Available);

        let err = copies.set_state(1, CopyState::Loaned).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_transfer_ignores_loan_state() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        mark_loaned(&copies, 1).await;

        let copy = copies.transfer(1, 2).await.unwrap();
        assert_eq!(copy.branch_id, 2);
        assert_eq!(copy.state, CopyState::Loaned);

        assert!(matches!(copies.transfer(99, 2).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_busy_copy() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        let _held = copies.lock(1).await.unwrap();

        let err = copies.set_state(1, CopyState::Maintenance).await.unwrap_err();
        assert!(matches!(err, AppError::Busy(_)));
    }

    #[tokio::test]
    async fn test_removed_copy_is_gone() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        copies.register(BookCopy::new(2, "A-2", 10, 2)).await.unwrap();
        copies.register(BookCopy::new(3, "B-1", 11, 1)).await.unwrap();

        let guards = copies.lock_book(10).await.unwrap();
        assert_eq!(guards.len(), 2);
        let removed = copies.remove_locked(guards).await;
        assert_eq!(removed.len(), 2);

        assert!(matches!(copies.get(1).await, Err(AppError::NotFound(_))));
        assert!(copies.list_by_book(10).await.unwrap().is_empty());
        assert_eq!(copies.list_by_branch(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_books_locks_do_not_block_listing() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        copies.register(BookCopy::new(2, "B-1", 11, 2)).await.unwrap();
        let _held = copies.lock(2).await.unwrap();

        assert_eq!(copies.list_by_book(10).await.unwrap().len(), 1);
        assert_eq!(copies.list_by_branch(1).await.unwrap().len(), 1);
        assert_eq!(copies.lock_book(10).await.unwrap().len(), 1);
        assert!(matches!(copies.list_by_branch(2).await, Err(AppError::Busy(_))));
    }

    #[tokio::test]
    async fn test_transfer_moves_copy_between_inventories() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();

        copies.transfer(1, 2).await.unwrap();
        assert!(copies.list_by_branch(1).await.unwrap().is_empty());
        assert_eq!(copies.list_by_branch(2).await.unwrap()[0].id, 1);
    }

    #[tokio::test]
    async fn test_no_new_copies_during_withdrawal() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();

        let guards = copies.lock_book(10).await.unwrap();
        let err = copies.register(BookCopy::new(2, "A-2", 10, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Busy(_)));
        assert!(matches!(copies.lock_book(10).await, Err(AppError::Busy(_))));

        let removed = copies.remove_locked(guards).await;
        copies.finish_withdrawal(10).await;
        assert_eq!(removed.len(), 1);
        let err = copies.register(BookCopy::new(2, "A-2", 10, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Other books are unaffected
        copies.register(BookCopy::new(3, "B-1", 11, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_reopens_book() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();

        let guards = copies.lock_book(10).await.unwrap();
        let removed = copies.remove_locked(guards).await;
        copies.restore(10, removed).await;

        assert_eq!(copies.get(1).await.unwrap().book_id, 10);
        copies.register(BookCopy::new(2, "A-2", 10, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_lock_book_releases_withdrawal() {
        let copies = repo();
        copies.register(BookCopy::new(1, "A-1", 10, 1)).await.unwrap();
        let held = copies.lock(1).await.unwrap();

        assert!(matches!(copies.lock_book(10).await, Err(AppError::Busy(_))));
        drop(held);
        copies.register(BookCopy::new(2, "A-2", 10, 1)).await.unwrap();
    }
}
