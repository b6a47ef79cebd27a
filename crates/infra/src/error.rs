//! Error surface of the engine's entry points.
//!
//! Domain, store and policy failures are flattened into one enum so callers
//! see a single set of kinds regardless of which layer refused the call.

use thiserror::Error;

use armsledger_auth::AuthzError;
use armsledger_core::DomainError;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock for item {item_ref}: requested {requested}, available {available}")]
    InsufficientStock {
        item_ref: String,
        requested: u32,
        available: u32,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Stale read, concurrent commit, or a state that forbids the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Stored documents disagree with each other.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidInput(msg) => EngineError::InvalidInput(msg),
            // A malformed id names nothing that could exist.
            DomainError::InvalidId(msg) => EngineError::NotFound(msg),
            DomainError::Validation(msg) => EngineError::Validation(msg),
            DomainError::DuplicateName(msg) => EngineError::DuplicateName(msg),
            DomainError::InsufficientStock {
                item_ref,
                requested,
                available,
            } => EngineError::InsufficientStock {
                item_ref,
                requested,
                available,
            },
            DomainError::InvariantViolation(msg) => EngineError::Invariant(msg),
            DomainError::NotFound(msg) => EngineError::NotFound(msg),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::Duplicate(msg) => EngineError::DuplicateName(msg),
            StoreError::Backend(msg) => EngineError::Store(msg),
        }
    }
}

impl From<AuthzError> for EngineError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Forbidden(permission) => EngineError::Forbidden(permission),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        EngineError::Config(value.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        EngineError::Store(format!("audit payload serialization failed: {value}"))
    }
}
