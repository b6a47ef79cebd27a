//! Engine layer: the document store, the transactional services built on it,
//! and the read-side queries.
//!
//! - `store`: document store with optimistic multi-document transactions
//! - `registry`: armory registry service
//! - `reconciliation`: issue / return / renew / patch / overdue sweep
//! - `possession`: what an officer currently holds
//! - `audit`: committed-event journal and bus fan-out

pub mod audit;
pub mod config;
pub mod error;
pub mod officers;
pub mod possession;
pub mod query;
pub mod reconciliation;
pub mod registry;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use audit::{ARMORY_AGGREGATE, AuditTrail, DISTRIBUTION_AGGREGATE};
pub use config::{ConfigError, LedgerConfig};
pub use error::EngineError;
pub use officers::{InMemoryOfficerDirectory, OfficerDirectory, OfficerRecord, OfficerStatus};
pub use possession::{PossessionView, Possessions};
pub use query::{ArmoryFilter, AuditFilter, DistributionFilter, Page, Pagination};
pub use reconciliation::{IssueItem, IssueRequest, ReconciliationEngine, ReturnOutcome};
pub use registry::{ArmoryRegistry, NewArmory};
pub use store::{AuditRecord, DocumentStore, InMemoryDocumentStore, StoreError, Transaction};
