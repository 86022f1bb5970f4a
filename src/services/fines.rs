//! Borrower fine balances kept outside the circulation engine

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::AppResult;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FineBalances: Send + Sync {
    /// Amount the borrower still owes from settled loans
    async fn outstanding(&self, borrower_id: i32) -> AppResult<Decimal>;
}

/// For deployments where fines are not tracked elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOutstandingFines;

#[async_trait]
impl FineBalances for NoOutstandingFines {
    async fn outstanding(&self, _borrower_id: i32) -> AppResult<Decimal> {
        Ok(Decimal::ZERO)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFineBalances {
    balances: RwLock<HashMap<i32, Decimal>>,
}

impl InMemoryFineBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, borrower_id: i32, amount: Decimal) {
        self.balances.write().await.insert(borrower_id, amount);
    }
}

#[async_trait]
impl FineBalances for InMemoryFineBalances {
    async fn outstanding(&self, borrower_id: i32) -> AppResult<Decimal> {
        Ok(self
            .balances
            .read()
            .await
            .get(&borrower_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}
