use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use armsledger_armory::Armory;
use armsledger_core::{AggregateRoot, ArmoryId, DistributionId, ExpectedVersion, OfficerId};
use armsledger_distribution::Distribution;

use super::{AuditRecord, DocumentKey, DocumentStore, StoreError, Transaction};

#[derive(Debug, Default)]
struct State {
    armories: HashMap<ArmoryId, Armory>,
    distributions: HashMap<DistributionId, Distribution>,
    journal: Vec<AuditRecord>,
}

impl State {
    fn version_of(&self, key: DocumentKey) -> Option<u64> {
        match key {
            DocumentKey::Armory(id) => self.armories.get(&id).map(|a| a.version()),
            DocumentKey::Distribution(id) => self.distributions.get(&id).map(|d| d.version()),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory document store with optimistic snapshot transactions.
///
/// Intended for tests/dev and single-process deployments. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| poisoned())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            journal: Vec::new(),
        })
    }

    fn armory(&self, id: ArmoryId) -> Result<Option<Armory>, StoreError> {
        Ok(self.read()?.armories.get(&id).cloned())
    }

    fn distribution(&self, id: DistributionId) -> Result<Option<Distribution>, StoreError> {
        Ok(self.read()?.distributions.get(&id).cloned())
    }

    fn armories(&self) -> Result<Vec<Armory>, StoreError> {
        Ok(self.read()?.armories.values().cloned().collect())
    }

    fn distributions(&self) -> Result<Vec<Distribution>, StoreError> {
        Ok(self.read()?.distributions.values().cloned().collect())
    }

    fn distributions_for_officer(&self, officer_id: OfficerId) -> Result<Vec<Distribution>, StoreError> {
        Ok(self
            .read()?
            .distributions
            .values()
            .filter(|d| d.officer_id() == officer_id)
            .cloned()
            .collect())
    }

    fn audit_log(&self) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self.read()?.journal.clone())
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Armory(Armory),
    Distribution(Distribution),
    DeleteArmory,
}

impl Staged {
    fn version(&self) -> Option<u64> {
        match self {
            Staged::Armory(a) => Some(a.version()),
            Staged::Distribution(d) => Some(d.version()),
            Staged::DeleteArmory => None,
        }
    }
}

#[derive(Debug)]
struct PendingWrite {
    /// Expectation against the committed document, from the first put.
    expected: ExpectedVersion,
    staged: Staged,
}

/// Transaction over an `InMemoryDocumentStore`.
///
/// Nothing is locked until `commit`, which takes the write lock, validates
/// the read set and every write expectation, and applies all or nothing.
#[derive(Debug)]
pub struct InMemoryTransaction {
    state: Arc<RwLock<State>>,
    reads: BTreeMap<DocumentKey, Option<u64>>,
    writes: BTreeMap<DocumentKey, PendingWrite>,
    journal: Vec<AuditRecord>,
}

impl InMemoryTransaction {
    fn stage(&mut self, key: DocumentKey, expected: ExpectedVersion, staged: Staged) -> Result<(), StoreError> {
        match self.writes.get_mut(&key) {
            Some(pending) => {
                let current = pending.staged.version();
                if !expected.matches(current) {
                    return Err(StoreError::Conflict(format!(
                        "{key}: staged version {current:?}, expected {expected:?}"
                    )));
                }
                pending.staged = staged;
            }
            None => {
                self.writes.insert(key, PendingWrite { expected, staged });
            }
        }
        Ok(())
    }
}

impl Transaction for InMemoryTransaction {
    fn load_armory(&mut self, id: ArmoryId) -> Result<Option<Armory>, StoreError> {
        let key = DocumentKey::Armory(id);
        if let Some(pending) = self.writes.get(&key) {
            return Ok(match &pending.staged {
                Staged::Armory(a) => Some(a.clone()),
                _ => None,
            });
        }

        let state = self.state.read().map_err(|_| poisoned())?;
        let doc = state.armories.get(&id).cloned();
        self.reads.entry(key).or_insert(doc.as_ref().map(|a| a.version()));
        Ok(doc)
    }

    fn load_distribution(&mut self, id: DistributionId) -> Result<Option<Distribution>, StoreError> {
        let key = DocumentKey::Distribution(id);
        if let Some(pending) = self.writes.get(&key) {
            return Ok(match &pending.staged {
                Staged::Distribution(d) => Some(d.clone()),
                _ => None,
            });
        }

        let state = self.state.read().map_err(|_| poisoned())?;
        let doc = state.distributions.get(&id).cloned();
        self.reads.entry(key).or_insert(doc.as_ref().map(|d| d.version()));
        Ok(doc)
    }

    fn distributions_for_armory(&mut self, armory_id: ArmoryId) -> Result<Vec<Distribution>, StoreError> {
        let mut found: BTreeMap<DistributionId, Distribution> = BTreeMap::new();
        {
            let state = self.state.read().map_err(|_| poisoned())?;
            for d in state.distributions.values().filter(|d| d.armory_id() == armory_id) {
                self.reads
                    .entry(DocumentKey::Distribution(d.id_typed()))
                    .or_insert(Some(d.version()));
                found.insert(d.id_typed(), d.clone());
            }
        }

        for (key, pending) in &self.writes {
            if let (DocumentKey::Distribution(id), Staged::Distribution(d)) = (key, &pending.staged) {
                if d.armory_id() == armory_id {
                    found.insert(*id, d.clone());
                }
            }
        }

        Ok(found.into_values().collect())
    }

    fn put_armory(&mut self, armory: Armory, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.stage(DocumentKey::Armory(armory.id_typed()), expected, Staged::Armory(armory))
    }

    fn put_distribution(
        &mut self,
        distribution: Distribution,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        self.stage(
            DocumentKey::Distribution(distribution.id_typed()),
            expected,
            Staged::Distribution(distribution),
        )
    }

    fn delete_armory(&mut self, id: ArmoryId, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.stage(DocumentKey::Armory(id), expected, Staged::DeleteArmory)
    }

    fn record(&mut self, envelope: AuditRecord) {
        self.journal.push(envelope);
    }

    fn commit(self) -> Result<Vec<AuditRecord>, StoreError> {
        let InMemoryTransaction {
            state,
            reads,
            writes,
            journal,
        } = self;

        if writes.is_empty() && journal.is_empty() {
            return Ok(vec![]);
        }

        let mut state = state.write().map_err(|_| poisoned())?;

        for (key, seen) in &reads {
            let now = state.version_of(*key);
            if now != *seen {
                return Err(StoreError::Conflict(format!(
                    "{key} changed since it was read ({seen:?} -> {now:?})"
                )));
            }
        }

        for (key, pending) in &writes {
            let now = state.version_of(*key);
            if !pending.expected.matches(now) {
                return Err(StoreError::Conflict(format!(
                    "{key}: expected {:?}, found {now:?}",
                    pending.expected
                )));
            }
        }

        for (key, pending) in &writes {
            let (DocumentKey::Armory(id), Staged::Armory(armory)) = (key, &pending.staged) else {
                continue;
            };
            let committed_clash = state.armories.values().any(|other| {
                other.id_typed() != *id
                    && !matches!(
                        writes.get(&DocumentKey::Armory(other.id_typed())),
                        Some(PendingWrite {
                            staged: Staged::DeleteArmory,
                            ..
                        })
                    )
                    && other.collides_with(armory.name(), armory.code())
            });
            let staged_clash = writes.iter().any(|(other_key, other)| {
                other_key != key
                    && matches!(&other.staged, Staged::Armory(o) if o.collides_with(armory.name(), armory.code()))
            });
            if committed_clash || staged_clash {
                return Err(StoreError::Duplicate(format!(
                    "'{}' / '{}'",
                    armory.name(),
                    armory.code()
                )));
            }
        }

        let written = writes.len();
        for (key, pending) in writes {
            match pending.staged {
                Staged::Armory(armory) => {
                    state.armories.insert(armory.id_typed(), armory);
                }
                Staged::Distribution(distribution) => {
                    state.distributions.insert(distribution.id_typed(), distribution);
                }
                Staged::DeleteArmory => {
                    if let DocumentKey::Armory(id) = key {
                        state.armories.remove(&id);
                    }
                }
            }
        }
        state.journal.extend(journal.iter().cloned());

        tracing::debug!(
            documents = written,
            audit_records = journal.len(),
            "transaction committed"
        );

        Ok(journal)
    }

    fn abort(self) {
        tracing::debug!(
            staged_writes = self.writes.len(),
            "transaction aborted"
        );
    }
}
