//! Bounded lock acquisition shared by the repositories

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, AppResult};

/// Lock `mutex`, giving up with `Busy` after `timeout`
pub(crate) async fn lock_within<T>(
    mutex: Arc<Mutex<T>>,
    timeout: Duration,
    what: impl Display,
) -> AppResult<OwnedMutexGuard<T>> {
    tokio::time::timeout(timeout, mutex.lock_owned())
        .await
        .map_err(|_| AppError::Busy(format!("timed out waiting for {}", what)))
}

/// One mutex per key, created on first use
pub(crate) struct KeyedLocks<K> {
    locks: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Copy + Display,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn acquire(&self, key: K, label: &str) -> AppResult<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody is holding or waiting on
            if locks.len() > 1024 {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        lock_within(mutex, self.timeout, format!("{} {}", label, key)).await
    }
}
