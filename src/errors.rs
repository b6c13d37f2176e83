use sea_orm::error::DbErr;
use sea_orm::TransactionError;
use serde::Serialize;
use thiserror::Error;

/// Service-level error type shared by every component.
///
/// All domain variants are recoverable, typed failures: the operation that
/// produced them mutated nothing and the message names the violated
/// invariant so the caller can correct and retry. The one exception is
/// `TamperedAuditChain`, which signals that a persisted audit range no
/// longer matches its recorded hashes; that is fatal for the range and
/// must be surfaced to an operator, never routed around.
#[derive(Error, Debug, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Quantity mismatch: {0}")]
    QuantityMismatch(String),

    #[error("Permission expired: {0}")]
    PermissionExpired(String),

    #[error("Permission already used: {0}")]
    PermissionAlreadyUsed(String),

    #[error("Tampered audit chain: {0}")]
    TamperedAuditChain(String),

    #[error("Event error: {0}")]
    EventError(String),
}

impl ServiceError {
    /// Wraps any database error input.
    pub fn db_error<E: Into<DbErr>>(error: E) -> Self {
        ServiceError::DatabaseError(error.into())
    }

    /// True when the error is a recoverable, caller-correctable failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ServiceError::TamperedAuditChain(_))
    }
}

impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Connection(e) => ServiceError::DatabaseError(e),
            TransactionError::Transaction(e) => e,
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tampered_chain_is_not_recoverable() {
        assert!(!ServiceError::TamperedAuditChain("seq 3".into()).is_recoverable());
        assert!(ServiceError::InsufficientStock("only 12 available".into()).is_recoverable());
    }

    #[test]
    fn messages_name_the_violated_invariant() {
        let err = ServiceError::InsufficientStock(
            "cannot reserve 30 units, only 12 available".to_string(),
        );
        assert_eq!(
            err.to_string(),
            "Insufficient stock: cannot reserve 30 units, only 12 available"
        );
    }
}
