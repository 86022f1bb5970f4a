//! Copy (physical instance of a book) model and related types

use serde::{Deserialize, Serialize};

use super::enums::CopyState;

/// One physical copy of a book, held by a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: i32,
    pub barcode: String,
    pub book_id: i32,
    pub branch_id: i32,
    #[serde(default)]
    pub state: CopyState,
}

impl BookCopy {
    pub fn new(id: i32, barcode: impl Into<String>, book_id: i32, branch_id: i32) -> Self {
        Self {
            id,
            barcode: barcode.into(),
            book_id,
            branch_id,
            state: CopyState::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == CopyState::Available
    }
}

/// Copy counts for one branch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchAvailability {
    pub branch_id: i32,
    pub available: usize,
    pub loaned: usize,
    pub maintenance: usize,
}

/// Availability summary of a book across branches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookAvailability {
    pub book_id: i32,
    pub total: usize,
    pub available: usize,
    pub loaned: usize,
    pub maintenance: usize,
    /// Sorted by branch id
    pub by_branch: Vec<BranchAvailability>,
    pub pending_reservations: usize,
}

impl BookAvailability {
    /// Tally copies of a book; `pending_reservations` is left to the caller
    pub fn from_copies(book_id: i32, copies: &[BookCopy]) -> Self {
        let mut summary = BookAvailability {
            book_id,
            total: copies.len(),
            ..Default::default()
        };

        let mut by_branch: std::collections::BTreeMap<i32, BranchAvailability> =
            std::collections::BTreeMap::new();

        for copy in copies {
            let branch = by_branch
                .entry(copy.branch_id)
                .or_insert_with(|| BranchAvailability {
                    branch_id: copy.branch_id,
                    ..Default::default()
                });
            match copy.state {
                CopyState::Available => {
                    summary.available += 1;
                    branch.available += 1;
                }
                CopyState::Loaned => {
                    summary.loaned += 1;
                    branch.loaned += 1;
                }
                CopyState::Maintenance => {
                    summary.maintenance += 1;
                    branch.maintenance += 1;
                }
            }
        }

        summary.by_branch = by_branch.into_values().collect();
        summary
    }
}
