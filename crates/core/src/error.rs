//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (bad input,
/// invariants, stock shortages, collisions). Storage and policy concerns live
/// in their own error types and are folded in at the service boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Missing or empty required input (e.g. no inventory arrays, no custodian).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A document failed schema validation (administrative corrections).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An armory name or code is already in use.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// A requested quantity exceeds what the armory currently has available.
    #[error("insufficient stock for item {item_ref}: requested {requested}, available {available}")]
    InsufficientStock {
        item_ref: String,
        requested: u32,
        available: u32,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced document or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (stale version, uniqueness, or outstanding references).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn duplicate_name(msg: impl Into<String>) -> Self {
        Self::DuplicateName(msg.into())
    }

    pub fn insufficient_stock(item_ref: impl core::fmt::Display, requested: u32, available: u32) -> Self {
        Self::InsufficientStock {
            item_ref: item_ref.to_string(),
            requested,
            available,
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
