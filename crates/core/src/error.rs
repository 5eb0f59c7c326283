//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// business rules, conflicts). Transport failures belong to the event and
/// capture layers; only store unavailability crosses over, because callers
/// must distinguish "retry later" from "this request is wrong".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed code, date, missing field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced unit (or its parent) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting unit already exists (duplicate code, concurrent writer).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business rule blocks the operation (delete with children,
    /// depth exceeded, disallowed status transition).
    #[error("business rule violated: {0}")]
    BusinessRule(String),

    /// A downstream store is temporarily unreachable; safe to retry.
    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn business_rule(msg: impl Into<String>) -> Self {
        Self::BusinessRule(msg.into())
    }

    pub fn transient_store(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    /// True when the failure is transient and the same call may succeed later.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}
