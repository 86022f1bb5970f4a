//! Error types for the Elidune circulation engine

use serde::Serialize;
use thiserror::Error;

/// Error codes exposed to callers, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    CopyNotAvailable = 7,
    Duplicate = 8,
    MaxBorrowsReached = 11,
    CopiesOnLoan = 13,
    NoSuchData = 20,
    BadTransition = 22,
    AlreadyReturned = 23,
    LoanTooLong = 24,
    UnpaidFine = 25,
    Busy = 26,
}

/// Coarse classification callers use to decide what to do with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    CapacityExceeded,
    PolicyViolation,
    Busy,
    Internal,
}

/// Main application error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Loan {0} was already returned")]
    AlreadyReturned(i32),

    #[error("Copy {0} is not available")]
    CopyUnavailable(i32),

    #[error("Maximum loans reached ({current}/{max})")]
    LoanLimitExceeded { current: usize, max: usize },

    #[error("Loan duration of {requested} days exceeds the maximum of {max} days")]
    DurationExceeded { requested: i64, max: i64 },

    #[error("Due date {due} is before loan date {loaned}")]
    InvalidDueDate { loaned: chrono::NaiveDate, due: chrono::NaiveDate },

    #[error("Borrower {0} has unpaid fines")]
    HasUnpaidFine(i32),

    #[error("Book {0} still has copies on loan")]
    BookHasActiveLoans(i32),

    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("External lookup failed: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_)
            | AppError::InvalidTransition(_)
            | AppError::AlreadyReturned(_) => ErrorKind::InvalidTransition,
            AppError::LoanLimitExceeded { .. } => ErrorKind::CapacityExceeded,
            AppError::CopyUnavailable(_)
            | AppError::DurationExceeded { .. }
            | AppError::InvalidDueDate { .. }
            | AppError::HasUnpaidFine(_)
            | AppError::BookHasActiveLoans(_) => ErrorKind::PolicyViolation,
            AppError::Busy(_) => ErrorKind::Busy,
            AppError::Collaborator(_) | AppError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Numeric code reported alongside the message
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::Conflict(_) => ErrorCode::Duplicate,
            AppError::InvalidTransition(_) => ErrorCode::BadTransition,
            AppError::AlreadyReturned(_) => ErrorCode::AlreadyReturned,
            AppError::CopyUnavailable(_) => ErrorCode::CopyNotAvailable,
            AppError::LoanLimitExceeded { .. } => ErrorCode::MaxBorrowsReached,
            AppError::DurationExceeded { .. } | AppError::InvalidDueDate { .. } => {
                ErrorCode::LoanTooLong
            }
            AppError::HasUnpaidFine(_) => ErrorCode::UnpaidFine,
            AppError::BookHasActiveLoans(_) => ErrorCode::CopiesOnLoan,
            AppError::Busy(_) => ErrorCode::Busy,
            AppError::Collaborator(_) | AppError::Config(_) => ErrorCode::Failure,
        }
    }

    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Busy(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// Error payload for callers that serialize failures (e.g. an HTTP layer)
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub kind: ErrorKind,
    pub error: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(e: &AppError) -> Self {
        let code = e.code();
        ErrorResponse {
            code: code as u32,
            kind: e.kind(),
            error: format!("{:?}", code),
            message: e.to_string(),
        }
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy() {
        assert_eq!(AppError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(AppError::AlreadyReturned(1).kind(), ErrorKind::InvalidTransition);
        assert_eq!(
            AppError::LoanLimitExceeded { current: 3, max: 3 }.kind(),
            ErrorKind::CapacityExceeded
        );
        assert_eq!(AppError::HasUnpaidFine(4).kind(), ErrorKind::PolicyViolation);
        assert_eq!(AppError::Busy("copy 1".into()).kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(AppError::Busy("book 1".into()).is_retryable());
        assert!(!AppError::CopyUnavailable(1).is_retryable());
    }

    #[test]
    fn test_error_response() {
        let err = AppError::CopyUnavailable(12);
        let body = ErrorResponse::from(&err);
        assert_eq!(body.code, 7);
        assert_eq!(body.error, "CopyNotAvailable");
        assert_eq!(body.message, "Copy 12 is not available");
    }

    #[test]
    fn test_codes_are_stable() {
        let codes = [
            ErrorCode::Failure,
            ErrorCode::CopyNotAvailable,
            ErrorCode::Duplicate,
            ErrorCode::MaxBorrowsReached,
            ErrorCode::CopiesOnLoan,
            ErrorCode::NoSuchData,
            ErrorCode::BadTransition,
            ErrorCode::AlreadyReturned,
            ErrorCode::LoanTooLong,
            ErrorCode::UnpaidFine,
            ErrorCode::Busy,
        ];
        let values: Vec<u32> = codes.iter().map(|code| *code as u32).collect();
        assert_eq!(values, vec![1, 7, 8, 11, 13, 20, 22, 23, 24, 25, 26]);
        assert_eq!(AppError::BookHasActiveLoans(3).code() as u32, 13);
    }
}
