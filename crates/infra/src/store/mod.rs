//! Document store boundary: armories and distributions stored as whole,
//! versioned documents, with multi-document transactions.
//!
//! A transaction reads documents, stages writes and audit envelopes, and then
//! either commits everything or nothing. Commit validates every version the
//! transaction observed (optimistic concurrency); a concurrent writer that got
//! there first turns the commit into `StoreError::Conflict`.
//!
//! Snapshot reads on the store itself (`armory`, `distributions`, ...) are not
//! synchronised with transactions and are meant for listings and views.

pub mod in_memory;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use armsledger_armory::Armory;
use armsledger_core::{ArmoryId, DistributionId, ExpectedVersion, OfficerId};
use armsledger_distribution::Distribution;
use armsledger_events::EventEnvelope;

pub use in_memory::{InMemoryDocumentStore, InMemoryTransaction};

/// Audit journal line as stored.
pub type AuditRecord = EventEnvelope<JsonValue>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKey {
    Armory(ArmoryId),
    Distribution(DistributionId),
}

impl core::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DocumentKey::Armory(id) => write!(f, "armory {id}"),
            DocumentKey::Distribution(id) => write!(f, "distribution {id}"),
        }
    }
}

/// Storage failure. These are infrastructure errors, not business rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Version validation failed at commit or on a staged write.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Armory name/code uniqueness enforced at commit.
    #[error("duplicate armory name or code: {0}")]
    Duplicate(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// One multi-document unit of work.
///
/// Reads see the transaction's own staged writes. Dropping a transaction
/// without committing discards it.
pub trait Transaction {
    fn load_armory(&mut self, id: ArmoryId) -> Result<Option<Armory>, StoreError>;

    fn load_distribution(&mut self, id: DistributionId) -> Result<Option<Distribution>, StoreError>;

    /// Every distribution that references `armory_id`, each one added to the read set.
    fn distributions_for_armory(&mut self, armory_id: ArmoryId) -> Result<Vec<Distribution>, StoreError>;

    fn put_armory(&mut self, armory: Armory, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn put_distribution(
        &mut self,
        distribution: Distribution,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    fn delete_armory(&mut self, id: ArmoryId, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Stage an audit envelope; it is journaled only if the commit succeeds.
    fn record(&mut self, envelope: AuditRecord);

    /// Validate and apply everything staged. Returns the journaled envelopes.
    fn commit(self) -> Result<Vec<AuditRecord>, StoreError>;

    fn abort(self);
}

pub trait DocumentStore: Send + Sync {
    type Tx: Transaction;

    fn begin(&self) -> Result<Self::Tx, StoreError>;

    fn armory(&self, id: ArmoryId) -> Result<Option<Armory>, StoreError>;

    fn distribution(&self, id: DistributionId) -> Result<Option<Distribution>, StoreError>;

    fn armories(&self) -> Result<Vec<Armory>, StoreError>;

    fn distributions(&self) -> Result<Vec<Distribution>, StoreError>;

    fn distributions_for_officer(&self, officer_id: OfficerId) -> Result<Vec<Distribution>, StoreError>;

    /// The full audit journal in commit order.
    fn audit_log(&self) -> Result<Vec<AuditRecord>, StoreError>;
}

impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    type Tx = S::Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }

    fn armory(&self, id: ArmoryId) -> Result<Option<Armory>, StoreError> {
        (**self).armory(id)
    }

    fn distribution(&self, id: DistributionId) -> Result<Option<Distribution>, StoreError> {
        (**self).distribution(id)
    }

    fn armories(&self) -> Result<Vec<Armory>, StoreError> {
        (**self).armories()
    }

    fn distributions(&self) -> Result<Vec<Distribution>, StoreError> {
        (**self).distributions()
    }

    fn distributions_for_officer(&self, officer_id: OfficerId) -> Result<Vec<Distribution>, StoreError> {
        (**self).distributions_for_officer(officer_id)
    }

    fn audit_log(&self) -> Result<Vec<AuditRecord>, StoreError> {
        (**self).audit_log()
    }
}
