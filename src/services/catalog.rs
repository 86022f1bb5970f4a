//! Catalog lookup consumed by the circulation engine

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, AppResult},
    models::BookCopy,
};

/// Book and branch existence, owned by catalog management
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn book_exists(&self, book_id: i32) -> AppResult<bool>;

    async fn branch_exists(&self, branch_id: i32) -> AppResult<bool>;

    /// Withdraw a book once circulation has released it
    async fn remove_book(&self, book_id: i32) -> AppResult<()>;
}

/// Catalog kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    books: RwLock<HashSet<i32>>,
    branches: RwLock<HashSet<i32>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(books: impl IntoIterator<Item = i32>, branches: impl IntoIterator<Item = i32>) -> Self {
        Self {
            books: RwLock::new(books.into_iter().collect()),
            branches: RwLock::new(branches.into_iter().collect()),
        }
    }

    pub async fn add_book(&self, book_id: i32) {
        self.books.write().await.insert(book_id);
    }

    pub async fn add_branch(&self, branch_id: i32) {
        self.branches.write().await.insert(branch_id);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn book_exists(&self, book_id: i32) -> AppResult<bool> {
        Ok(self.books.read().await.contains(&book_id))
    }

    async fn branch_exists(&self, branch_id: i32) -> AppResult<bool> {
        Ok(self.branches.read().await.contains(&branch_id))
    }

    async fn remove_book(&self, book_id: i32) -> AppResult<()> {
        if self.books.write().await.remove(&book_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Book with id {} not found", book_id)))
        }
    }
}

/// Startup content for the in-memory catalog
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub branches: Vec<i32>,
    #[serde(default)]
    pub books: Vec<i32>,
    #[serde(default)]
    pub copies: Vec<BookCopy>,
}

impl CatalogSeed {
    pub fn from_json(json: &str) -> AppResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("Invalid catalog seed: {}", e)))
    }

    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Config(format!("Cannot read catalog seed {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn catalog(&self) -> InMemoryCatalog {
        InMemoryCatalog::with_entries(self.books.iter().copied(), self.branches.iter().copied())
    }
}
