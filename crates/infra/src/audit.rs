//! Audit trail: journaling committed events and publishing them.
//!
//! Ordering invariant: envelopes are staged in the same transaction as the
//! documents they describe, and published only after that commit succeeds.

use serde::Serialize;
use uuid::Uuid;

use armsledger_auth::{AccessPolicy, Operation, Principal, Resource};
use armsledger_core::UserId;
use armsledger_events::{Event, EventBus, EventEnvelope};

use crate::error::EngineError;
use crate::query::{AuditFilter, Page, Pagination, paginate};
use crate::store::{AuditRecord, DocumentStore, Transaction};

pub const ARMORY_AGGREGATE: &str = "armory";
pub const DISTRIBUTION_AGGREGATE: &str = "distribution";

/// Stage one envelope per event.
///
/// `version_before` is the document version before these events were
/// applied, so the envelopes carry the versions the document passes through.
pub(crate) fn stage_events<T, E>(
    tx: &mut T,
    aggregate_id: Uuid,
    aggregate_type: &'static str,
    version_before: u64,
    actor: UserId,
    events: &[E],
) -> Result<(), EngineError>
where
    T: Transaction,
    E: Event + Serialize,
{
    for (offset, event) in events.iter().enumerate() {
        let envelope = EventEnvelope::from_typed(
            aggregate_id,
            aggregate_type,
            version_before + offset as u64 + 1,
            Some(actor),
            event,
        )?;
        tx.record(envelope);
    }
    Ok(())
}

/// Commit, then fan the journaled envelopes out on the bus.
///
/// A publish failure after commit is logged and swallowed: the mutation is
/// durable and the journal still holds the record.
pub(crate) fn commit_and_publish<T, B>(tx: T, bus: &B) -> Result<Vec<AuditRecord>, EngineError>
where
    T: Transaction,
    B: EventBus<AuditRecord>,
{
    let committed = tx.commit()?;

    for envelope in &committed {
        if let Err(err) = bus.publish(envelope.clone()) {
            tracing::warn!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                error = ?err,
                "audit publish failed after commit"
            );
        }
    }

    Ok(committed)
}

/// Read side of the audit journal.
pub struct AuditTrail<S> {
    store: S,
    policy: std::sync::Arc<dyn AccessPolicy>,
}

impl<S> AuditTrail<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, policy: std::sync::Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    #[tracing::instrument(skip(self, principal, filter), fields(user_id = %principal.user_id), err)]
    pub fn query(
        &self,
        principal: &Principal,
        filter: &AuditFilter,
        pagination: Pagination,
    ) -> Result<Page<AuditRecord>, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReadAudit, &Resource::Registry)?;

        let matching: Vec<AuditRecord> = self
            .store
            .audit_log()?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();

        Ok(paginate(matching, pagination))
    }
}
