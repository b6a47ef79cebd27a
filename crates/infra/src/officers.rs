//! Read-only officer lookup.
//!
//! Officer records are owned elsewhere; the engine only asks whether an
//! officer exists and may receive items.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use armsledger_core::OfficerId;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfficerStatus {
    #[default]
    Active,
    OnLeave,
    Suspended,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficerRecord {
    pub officer_id: OfficerId,
    pub name: String,
    pub service_number: String,
    /// Current posting (office or patrol).
    pub assignment: Option<String>,
    pub status: OfficerStatus,
}

impl OfficerRecord {
    /// Only active officers may be issued items.
    pub fn is_eligible(&self) -> bool {
        self.status == OfficerStatus::Active
    }
}

pub trait OfficerDirectory: Send + Sync {
    fn lookup(&self, officer_id: OfficerId) -> Option<OfficerRecord>;
}

impl<D> OfficerDirectory for Arc<D>
where
    D: OfficerDirectory + ?Sized,
{
    fn lookup(&self, officer_id: OfficerId) -> Option<OfficerRecord> {
        (**self).lookup(officer_id)
    }
}

/// Directory backed by a map; used in tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryOfficerDirectory {
    officers: RwLock<HashMap<OfficerId, OfficerRecord>>,
}

impl InMemoryOfficerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Records are independent, so a lock
    /// poisoned by a panicking writer is recovered rather than losing the write.
    pub fn upsert(&self, record: OfficerRecord) {
        let mut officers = self.officers.write().unwrap_or_else(|poisoned| {
            tracing::warn!(officer_id = %record.officer_id, "officer directory lock poisoned; recovering");
            poisoned.into_inner()
        });
        officers.insert(record.officer_id, record);
    }
}

impl OfficerDirectory for InMemoryOfficerDirectory {
    fn lookup(&self, officer_id: OfficerId) -> Option<OfficerRecord> {
        self.officers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&officer_id)
            .cloned()
    }
}
