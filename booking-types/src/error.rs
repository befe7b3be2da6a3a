//! Error types for the booking payment service.

use crate::domain::{Currency, PaymentStatus};
use crate::ports::GatewayError;

/// Domain-level errors (business logic violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },

    #[error("Invalid booking date: {0}")]
    InvalidBookingDate(String),

    #[error("Listing {listing} is not offered by guide {guide}")]
    ListingGuideMismatch { listing: String, guide: String },

    #[error("Payment status cannot move from {from} to {to}")]
    PaymentStatusRegression {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e @ DomainError::PaymentStatusRegression { .. }) => {
                AppError::Conflict(e.to_string())
            }
            RepoError::Domain(DomainError::ValidationError(msg)) => AppError::BadRequest(msg),
            RepoError::Domain(e) => AppError::BadRequest(e.to_string()),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::Conflict(e),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::from(RepoError::Domain(err))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_maps_to_conflict() {
        let err: AppError = RepoError::Domain(DomainError::PaymentStatusRegression {
            from: PaymentStatus::Paid,
            to: PaymentStatus::Unpaid,
        })
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_gateway_error_maps_to_gateway() {
        let err: AppError = GatewayError::Timeout.into();
        assert!(matches!(err, AppError::Gateway(_)));
    }
}
