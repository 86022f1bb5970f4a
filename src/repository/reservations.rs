//! Reservation queues: one ordered waiting list per book
//!
//! Every mutation of a book's queue happens under that book's lock, so
//! queued positions stay a dense `1..=k` sequence. Different books never
//! contend with each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use super::locks::lock_within;
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Reservation, ReservationState, SweepFailure, SweepReport},
};

/// All reservations of one book, in arrival order
#[derive(Debug, Default)]
struct BookQueue {
    reservations: IndexMap<i32, Reservation>,
    /// Set once the book leaves the catalog; no one may join afterwards
    withdrawn: bool,
}

impl BookQueue {
    fn queued(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().filter(|r| r.is_queued())
    }

    fn queued_count(&self) -> usize {
        self.queued().count()
    }

    fn push(&mut self, id: i32, book_id: i32, borrower_id: i32, now: DateTime<Utc>) -> Reservation {
        // Keep queued_at non-decreasing along the line even if the wall clock steps back
        let queued_at = self
            .queued()
            .map(|r| r.queued_at)
            .max()
            .map_or(now, |last| last.max(now));

        let reservation = Reservation {
            id,
            borrower_id,
            book_id,
            queued_at,
            state: ReservationState::Queued,
            position: self.queued_count() as u32 + 1,
        };
        self.reservations.insert(id, reservation.clone());
        reservation
    }

    /// Move a queued reservation to a terminal state and close the gap it leaves
    fn close(&mut self, id: i32, state: ReservationState) -> AppResult<Reservation> {
        let reservation = self
            .reservations
            .get_mut(&id)
            .ok_or_else(|| not_found(id))?;

        if reservation.state.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "Reservation {} is already {}",
                id, reservation.state
            )));
        }

        reservation.state = state;
        let vacated = reservation.position;
        let closed = reservation.clone();

        for other in self.reservations.values_mut() {
            if other.is_queued() && other.position > vacated {
                other.position -= 1;
            }
        }
        Ok(closed)
    }

    /// Queued reservations older than `ttl`, lowest position first
    fn stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> Vec<i32> {
        let mut stale: Vec<&Reservation> = self
            .queued()
            .filter(|r| now - r.queued_at > ttl)
            .collect();
        stale.sort_by_key(|r| r.position);
        stale.into_iter().map(|r| r.id).collect()
    }

    fn snapshot(&self) -> Vec<Reservation> {
        let mut queued: Vec<Reservation> = self.queued().cloned().collect();
        queued.sort_by_key(|r| r.position);
        queued
    }
}

#[derive(Clone)]
pub struct ReservationsRepository {
    queues: Arc<RwLock<HashMap<i32, Arc<Mutex<BookQueue>>>>>,
    /// reservation id -> book id
    books_by_reservation: Arc<RwLock<HashMap<i32, i32>>>,
    next_id: Arc<AtomicI32>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    lock_timeout: Duration,
}

impl ReservationsRepository {
    pub fn new(clock: Arc<dyn Clock>, ttl: chrono::Duration, lock_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            books_by_reservation: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI32::new(1)),
            clock,
            ttl,
            lock_timeout,
        }
    }

    /// Put a borrower at the end of a book's queue
    pub async fn enqueue(&self, book_id: i32, borrower_id: i32) -> AppResult<Reservation> {
        let queue = self.queue_or_default(book_id).await;
        let mut queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
        if queue.withdrawn {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }

        // Read the clock only once the book is locked, so arrival order and
        // queued_at agree
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reservation = queue.push(id, book_id, borrower_id, self.clock.now());
        self.books_by_reservation.write().await.insert(id, book_id);

        tracing::info!(
            reservation_id = id,
            book_id,
            borrower_id,
            position = reservation.position,
            "Reservation queued"
        );
        Ok(reservation)
    }

    pub async fn cancel(&self, reservation_id: i32) -> AppResult<Reservation> {
        let reservation = self.close(reservation_id, ReservationState::Cancelled).await?;
        tracing::info!(reservation_id, book_id = reservation.book_id, "Reservation cancelled");
        Ok(reservation)
    }

    pub async fn fulfill(&self, reservation_id: i32) -> AppResult<Reservation> {
        let reservation = self.close(reservation_id, ReservationState::Fulfilled).await?;
        tracing::info!(reservation_id, book_id = reservation.book_id, "Reservation fulfilled");
        Ok(reservation)
    }

    /// Cancel every queued reservation of a book withdrawn from the catalog
    /// and close its queue to newcomers
    pub async fn cancel_all(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let queue = self.queue_or_default(book_id).await;
        let mut queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
        queue.withdrawn = true;

        let ids: Vec<i32> = queue.snapshot().into_iter().map(|r| r.id).collect();
        ids.into_iter()
            .map(|id| queue.close(id, ReservationState::Cancelled))
            .collect()
    }

    /// Expire the stale reservations of one book as a single atomic unit
    pub async fn expire_stale_for_book(&self, book_id: i32, now: DateTime<Utc>) -> AppResult<Vec<i32>> {
        let Some(queue) = self.queue(book_id).await else {
            return Ok(Vec::new());
        };
        let mut queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;

        let stale = queue.stale(now, self.ttl);
        for id in &stale {
            queue.close(*id, ReservationState::Expired)?;
        }
        Ok(stale)
    }

    /// Expire stale reservations of every book. A book that cannot be
    /// processed is reported and skipped.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for book_id in self.book_ids().await {
            match self.expire_stale_for_book(book_id, now).await {
                Ok(expired) if expired.is_empty() => {}
                Ok(expired) => {
                    report.expired.insert(book_id, expired);
                }
                Err(e) => report.failures.push(SweepFailure {
                    book_id,
                    error: e.to_string(),
                }),
            }
        }
        report
    }

    /// Queued reservations of a book, by position
    pub async fn peek_queue(&self, book_id: i32) -> AppResult<Vec<Reservation>> {
        let Some(queue) = self.queue(book_id).await else {
            return Ok(Vec::new());
        };
        let queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
        Ok(queue.snapshot())
    }

    pub async fn queued_count(&self, book_id: i32) -> AppResult<usize> {
        Ok(self.peek_queue(book_id).await?.len())
    }

    pub async fn get_by_id(&self, reservation_id: i32) -> AppResult<Reservation> {
        let book_id = self.book_of(reservation_id).await?;
        let queue = self.queue(book_id).await.ok_or_else(|| not_found(reservation_id))?;
        let queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
        queue
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| not_found(reservation_id))
    }

    /// Every reservation of a borrower, newest first
    pub async fn reservations_for(&self, borrower_id: i32) -> AppResult<Vec<Reservation>> {
        let queues: Vec<(i32, Arc<Mutex<BookQueue>>)> = self
            .queues
            .read()
            .await
            .iter()
            .map(|(book_id, queue)| (*book_id, queue.clone()))
            .collect();

        let mut found = Vec::new();
        for (book_id, queue) in queues {
            let queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
            found.extend(
                queue
                    .reservations
                    .values()
                    .filter(|r| r.borrower_id == borrower_id)
                    .cloned(),
            );
        }
        found.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn close(&self, reservation_id: i32, state: ReservationState) -> AppResult<Reservation> {
        let book_id = self.book_of(reservation_id).await?;
        let queue = self.queue(book_id).await.ok_or_else(|| not_found(reservation_id))?;
        let mut queue = lock_within(queue, self.lock_timeout, format!("book {} queue", book_id)).await?;
        queue.close(reservation_id, state)
    }

    async fn book_of(&self, reservation_id: i32) -> AppResult<i32> {
        self.books_by_reservation
            .read()
            .await
            .get(&reservation_id)
            .copied()
            .ok_or_else(|| not_found(reservation_id))
    }

    async fn queue(&self, book_id: i32) -> Option<Arc<Mutex<BookQueue>>> {
        self.queues.read().await.get(&book_id).cloned()
    }

    async fn queue_or_default(&self, book_id: i32) -> Arc<Mutex<BookQueue>> {
        self.queues.write().await.entry(book_id).or_default().clone()
    }

    async fn book_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.queues.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn not_found(reservation_id: i32) -> AppError {
    AppError::NotFound(format!("Reservation with id {} not found", reservation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    const BOOK: i32 = 10;

    fn setup() -> (Arc<FixedClock>, ReservationsRepository) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let repo = ReservationsRepository::new(
            clock.clone(),
            chrono::Duration::days(2),
            Duration::from_millis(50),
        );
        (clock, repo)
    }

    fn positions(queue: &[Reservation]) -> Vec<(i32, u32)> {
        queue.iter().map(|r| (r.borrower_id, r.position)).collect()
    }

    fn assert_dense(queue: &[Reservation]) {
        let expected: Vec<u32> = (1..=queue.len() as u32).collect();
        assert_eq!(queue.iter().map(|r| r.position).collect::<Vec<_>>(), expected);
        assert!(queue.windows(2).all(|w| w[0].queued_at <= w[1].queued_at));
    }

    #[tokio::test]
    async fn test_cancel_promotes_next_in_line() {
        let (_clock, repo) = setup();
        let a = repo.enqueue(BOOK, 1).await.unwrap();
        let c = repo.enqueue(BOOK, 3).await.unwrap();
        assert_eq!((a.position, c.position), (1, 2));

        let cancelled = repo.cancel(a.id).await.unwrap();
        assert_eq!(cancelled.state, ReservationState::Cancelled);

        let queue = repo.peek_queue(BOOK).await.unwrap();
        assert_eq!(positions(&queue), vec![(3, 1)]);
        assert_eq!(repo.get_by_id(c.id).await.unwrap().position, 1);
    }

    #[tokio::test]
    async fn test_cancel_in_the_middle() {
        let (clock, repo) = setup();
        let mut ids = Vec::new();
        for borrower in 1..=5 {
            ids.push(repo.enqueue(BOOK, borrower).await.unwrap().id);
            clock.advance(chrono::Duration::minutes(1));
        }

        repo.cancel(ids[2]).await.unwrap();

        let queue = repo.peek_queue(BOOK).await.unwrap();
        assert_eq!(positions(&queue), vec![(1, 1), (2, 2), (4, 3), (5, 4)]);
        assert_dense(&queue);
    }

    #[tokio::test]
    async fn test_terminal_reservation_is_frozen() {
        let (_clock, repo) = setup();
        let r = repo.enqueue(BOOK, 1).await.unwrap();
        repo.cancel(r.id).await.unwrap();

        assert!(matches!(repo.cancel(r.id).await, Err(AppError::InvalidTransition(_))));
        assert!(matches!(repo.fulfill(r.id).await, Err(AppError::InvalidTransition(_))));
        assert!(matches!(repo.cancel(999).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_same_instant_keeps_arrival_order() {
        let (_clock, repo) = setup();
        let first = repo.enqueue(BOOK, 50).await.unwrap();
        let second = repo.enqueue(BOOK, 2).await.unwrap();

        assert_eq!(first.queued_at, second.queued_at);
        assert_eq!((first.position, second.position), (1, 2));
    }

    #[tokio::test]
    async fn test_queues_are_per_book() {
        let (_clock, repo) = setup();
        repo.enqueue(BOOK, 1).await.unwrap();
        let other = repo.enqueue(BOOK + 1, 1).await.unwrap();
        assert_eq!(other.position, 1);
        assert_eq!(repo.queued_count(BOOK).await.unwrap(), 1);
        assert!(repo.peek_queue(BOOK + 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_stale_repacks_and_is_idempotent() {
        let (clock, repo) = setup();
        let old_a = repo.enqueue(BOOK, 1).await.unwrap();
        let old_b = repo.enqueue(BOOK, 2).await.unwrap();
        clock.advance(chrono::Duration::days(1));
        repo.enqueue(BOOK, 3).await.unwrap();
        repo.enqueue(BOOK + 1, 4).await.unwrap();

        let now = clock.now() + chrono::Duration::days(1) + chrono::Duration::hours(1);
        let report = repo.expire_stale(now).await;
        assert!(report.is_clean());
        assert_eq!(report.expired.get(&BOOK), Some(&vec![old_a.id, old_b.id]));
        assert_eq!(report.expired_count(), 2);

        let queue = repo.peek_queue(BOOK).await.unwrap();
        assert_eq!(positions(&queue), vec![(3, 1)]);

        let again = repo.expire_stale(now).await;
        assert_eq!(again.expired_count(), 0);
        assert_eq!(positions(&repo.peek_queue(BOOK).await.unwrap()), vec![(3, 1)]);
        assert_eq!(
            repo.get_by_id(old_a.id).await.unwrap().state,
            ReservationState::Expired
        );
    }

    #[tokio::test]
    async fn test_exactly_ttl_old_is_not_stale() {
        let (clock, repo) = setup();
        repo.enqueue(BOOK, 1).await.unwrap();

        let report = repo.expire_stale(clock.now() + chrono::Duration::days(2)).await;
        assert_eq!(report.expired_count(), 0);
    }

    #[tokio::test]
    async fn test_locked_book_does_not_stop_sweep() {
        let (clock, repo) = setup();
        repo.enqueue(BOOK, 1).await.unwrap();
        repo.enqueue(BOOK + 1, 2).await.unwrap();

        let held = repo.queue(BOOK).await.unwrap();
        let _guard = held.lock().await;

        let report = repo.expire_stale(clock.now() + chrono::Duration::days(3)).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].book_id, BOOK);
        assert_eq!(report.expired.get(&(BOOK + 1)).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_cancel_all_and_history() {
        let (clock, repo) = setup();
        let first = repo.enqueue(BOOK, 1).await.unwrap();
        clock.advance(chrono::Duration::minutes(5));
        let second = repo.enqueue(BOOK + 1, 1).await.unwrap();
        repo.enqueue(BOOK, 2).await.unwrap();

        let cancelled = repo.cancel_all(BOOK).await.unwrap();
        assert_eq!(cancelled.len(), 2);
        assert!(repo.peek_queue(BOOK).await.unwrap().is_empty());

        let mine = repo.reservations_for(1).await.unwrap();
        assert_eq!(mine.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_and_cancel_stay_dense() {
        let (_clock, repo) = setup();
        let repo = ReservationsRepository {
            lock_timeout: Duration::from_secs(5),
            ..repo
        };

        let mut initial = Vec::new();
        for borrower in 0..20 {
            initial.push(repo.enqueue(BOOK, borrower).await.unwrap().id);
        }

        let mut tasks = Vec::new();
        for (i, id) in initial.into_iter().enumerate() {
            let repo = repo.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    repo.cancel(id).await.map(|_| ())
                } else {
                    repo.enqueue(BOOK, 100 + i as i32).await.map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let queue = repo.peek_queue(BOOK).await.unwrap();
        assert_eq!(queue.len(), 20);
        assert_dense(&queue);
    }

    #[tokio::test]
    async fn test_withdrawn_book_refuses_reservations() {
        let (_clock, repo) = setup();
        let waiting = repo.enqueue(BOOK, 1).await.unwrap();
        repo.cancel_all(BOOK).await.unwrap();

        assert!(matches!(repo.enqueue(BOOK, 2).await, Err(AppError::NotFound(_))));
        assert!(repo.peek_queue(BOOK).await.unwrap().is_empty());
        assert_eq!(
            repo.get_by_id(waiting.id).await.unwrap().state,
            ReservationState::Cancelled
        );

        // A book that never had a queue is closed as well
        assert!(repo.cancel_all(BOOK + 1).await.unwrap().is_empty());
        assert!(matches!(repo.enqueue(BOOK + 1, 2).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_sweep_closes_each_reservation_once() {
        let (clock, repo) = setup();
        let repo = ReservationsRepository {
            lock_timeout: Duration::from_secs(5),
            ..repo
        };

        let mut stale = Vec::new();
        for borrower in 0..6 {
            stale.push(repo.enqueue(BOOK, borrower).await.unwrap().id);
        }
        clock.advance(chrono::Duration::days(1));
        let mut fresh = Vec::new();
        for borrower in 6..12 {
            fresh.push(repo.enqueue(BOOK, borrower).await.unwrap().id);
        }
        let now = clock.now() + chrono::Duration::days(1) + chrono::Duration::hours(1);

        // Cancel every other reservation, stale and fresh, while a sweep runs
        let targets: Vec<i32> = stale.iter().chain(fresh.iter()).copied().step_by(2).collect();
        let sweep = tokio::spawn({
            let repo = repo.clone();
            async move { repo.expire_stale(now).await }
        });
        let cancels: Vec<_> = targets
            .iter()
            .map(|&id| {
                let repo = repo.clone();
                tokio::spawn(async move { (id, repo.cancel(id).await) })
            })
            .collect();

        let report = sweep.await.unwrap();
        assert!(report.is_clean());
        let expired = report.expired.get(&BOOK).cloned().unwrap_or_default();

        for task in cancels {
            let (id, result) = task.await.unwrap();
            let state = repo.get_by_id(id).await.unwrap().state;
            match result {
                Ok(_) => {
                    assert_eq!(state, ReservationState::Cancelled);
                    assert!(!expired.contains(&id));
                }
                Err(e) => {
                    assert!(matches!(e, AppError::InvalidTransition(_)));
                    assert_eq!(state, ReservationState::Expired);
                    assert!(expired.contains(&id));
                }
            }
        }

        for id in &stale {
            assert!(repo.get_by_id(*id).await.unwrap().state.is_terminal());
        }
        let queue = repo.peek_queue(BOOK).await.unwrap();
        let survivors: Vec<i32> = fresh.iter().copied().skip(1).step_by(2).collect();
        assert_eq!(queue.iter().map(|r| r.id).collect::<Vec<_>>(), survivors);
        assert_dense(&queue);
    }
}
