//! Armory Registry service: create, append, correct, hand over, remove, read.
//!
//! Every call runs the same pipeline:
//!
//! ```text
//! policy check → begin → load → handle (pure) → apply → put (expected version)
//!              → stage audit envelopes → commit → publish
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use armsledger_armory::{
    AppendInventory, Armory, ArmoryCommand, ArmoryCorrection, ArmoryProfile, CorrectArmory,
    CreateArmory, CustodianAssignment, HandOverCustody, InventoryBatch, RemoveArmory,
};
use armsledger_auth::{AccessPolicy, Operation, Principal, Resource};
use armsledger_core::{Aggregate, AggregateRoot, ArmoryId, DomainError, ExpectedVersion};
use armsledger_events::EventBus;

use crate::audit::{ARMORY_AGGREGATE, commit_and_publish, stage_events};
use crate::config::LedgerConfig;
use crate::error::EngineError;
use crate::query::{ArmoryFilter, Page, Pagination, paginate};
use crate::store::{AuditRecord, DocumentStore, Transaction};

/// Request to create an armory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArmory {
    pub profile: ArmoryProfile,
    pub custodian: Option<CustodianAssignment>,
    /// Optional opening stock.
    #[serde(default)]
    pub inventory: InventoryBatch,
}

pub struct ArmoryRegistry<S, B> {
    store: S,
    bus: B,
    policy: Arc<dyn AccessPolicy>,
    config: LedgerConfig,
}

impl<S, B> ArmoryRegistry<S, B>
where
    S: DocumentStore,
    B: EventBus<AuditRecord>,
{
    pub fn new(store: S, bus: B, policy: Arc<dyn AccessPolicy>, config: LedgerConfig) -> Self {
        Self {
            store,
            bus,
            policy,
            config,
        }
    }

    #[instrument(skip(self, principal, spec), fields(user_id = %principal.user_id, name = %spec.profile.name), err)]
    pub fn create(&self, principal: &Principal, spec: NewArmory) -> Result<Armory, EngineError> {
        self.policy
            .evaluate(principal, Operation::CreateArmory, &Resource::Registry)?;

        let armory_id = ArmoryId::new();
        let mut armory = Armory::empty(armory_id);
        let command = ArmoryCommand::Create(CreateArmory {
            armory_id,
            reference_id: Armory::reference_for(armory_id),
            profile: spec.profile,
            custodian: spec.custodian,
            inventory: spec.inventory,
            created_by: principal.user_id,
            occurred_at: Utc::now(),
        });
        let events = armory.handle(&command)?;
        for e in &events {
            armory.apply(e);
        }

        // Early answer for the common case; commit re-checks under the write lock.
        if self
            .store
            .armories()?
            .iter()
            .any(|other| other.collides_with(armory.name(), armory.code()))
        {
            return Err(DomainError::duplicate_name(format!(
                "'{}' / '{}'",
                armory.name(),
                armory.code()
            ))
            .into());
        }

        let mut tx = self.store.begin()?;
        tx.put_armory(armory.clone(), ExpectedVersion::NoDocument)?;
        stage_events(&mut tx, *armory_id.as_uuid(), ARMORY_AGGREGATE, 0, principal.user_id, &events)?;
        commit_and_publish(tx, &self.bus)?;

        tracing::info!(
            armory_id = %armory_id,
            reference_id = armory.reference_id(),
            entries = armory.all_entries().count(),
            "armory created"
        );
        Ok(armory)
    }

    #[instrument(skip(self, principal, batch), fields(user_id = %principal.user_id, armory_id = %armory_id), err)]
    pub fn append_inventory(
        &self,
        principal: &Principal,
        armory_id: ArmoryId,
        batch: InventoryBatch,
    ) -> Result<Armory, EngineError> {
        self.policy
            .evaluate(principal, Operation::AppendInventory, &Resource::Armory(armory_id))?;

        let armory = self.mutate(
            principal,
            armory_id,
            ArmoryCommand::AppendInventory(AppendInventory {
                armory_id,
                batch,
                added_by: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(armory_id = %armory_id, version = armory.version(), "inventory appended");
        Ok(armory)
    }

    /// Administrative full correction of identity and inventory.
    #[instrument(skip(self, principal, correction), fields(user_id = %principal.user_id, armory_id = %armory_id), err)]
    pub fn mutate_full(
        &self,
        principal: &Principal,
        armory_id: ArmoryId,
        correction: ArmoryCorrection,
    ) -> Result<Armory, EngineError> {
        self.policy
            .evaluate(principal, Operation::CorrectArmory, &Resource::Armory(armory_id))?;

        let armory = self.mutate(
            principal,
            armory_id,
            ArmoryCommand::Correct(CorrectArmory {
                armory_id,
                correction,
                corrected_by: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(armory_id = %armory_id, version = armory.version(), "armory corrected");
        Ok(armory)
    }

    #[instrument(skip(self, principal, incoming, remarks), fields(user_id = %principal.user_id, armory_id = %armory_id), err)]
    pub fn hand_over(
        &self,
        principal: &Principal,
        armory_id: ArmoryId,
        incoming: CustodianAssignment,
        remarks: Option<String>,
    ) -> Result<Armory, EngineError> {
        self.policy
            .evaluate(principal, Operation::HandOverArmory, &Resource::Armory(armory_id))?;

        let armory = self.mutate(
            principal,
            armory_id,
            ArmoryCommand::HandOver(HandOverCustody {
                armory_id,
                incoming,
                remarks,
                recorded_by: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(
            armory_id = %armory_id,
            custodian = ?armory.current_custodian().map(|c| c.officer_id),
            "custody handed over"
        );
        Ok(armory)
    }

    /// Hard delete. Refused while distributions against the armory are
    /// outstanding unless the config allows it.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id, armory_id = %armory_id), err)]
    pub fn remove(&self, principal: &Principal, armory_id: ArmoryId) -> Result<(), EngineError> {
        self.policy
            .evaluate(principal, Operation::RemoveArmory, &Resource::Armory(armory_id))?;

        let mut tx = self.store.begin()?;
        let mut armory = tx
            .load_armory(armory_id)?
            .ok_or_else(|| EngineError::not_found(format!("armory {armory_id}")))?;
        let version_before = armory.version();

        let open = tx
            .distributions_for_armory(armory_id)?
            .iter()
            .filter(|d| d.is_outstanding())
            .count();
        if open > 0 && !self.config.allow_remove_with_open_distributions {
            tx.abort();
            tracing::warn!(armory_id = %armory_id, open, "removal refused: distributions outstanding");
            return Err(EngineError::Conflict(format!(
                "armory {armory_id} has {open} outstanding distribution(s)"
            )));
        }

        let events = armory.handle(&ArmoryCommand::Remove(RemoveArmory {
            armory_id,
            removed_by: principal.user_id,
            occurred_at: Utc::now(),
        }))?;
        for e in &events {
            armory.apply(e);
        }

        tx.delete_armory(armory_id, ExpectedVersion::Exact(version_before))?;
        stage_events(
            &mut tx,
            *armory_id.as_uuid(),
            ARMORY_AGGREGATE,
            version_before,
            principal.user_id,
            &events,
        )?;
        commit_and_publish(tx, &self.bus)?;

        tracing::info!(armory_id = %armory_id, open, "armory removed");
        Ok(())
    }

    pub fn get(&self, principal: &Principal, armory_id: ArmoryId) -> Result<Armory, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReadArmory, &Resource::Armory(armory_id))?;

        self.store
            .armory(armory_id)?
            .ok_or_else(|| EngineError::not_found(format!("armory {armory_id}")))
    }

    /// Armories matching `filter`, ordered by name.
    pub fn list(
        &self,
        principal: &Principal,
        filter: &ArmoryFilter,
        pagination: Pagination,
    ) -> Result<Page<Armory>, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReadArmory, &Resource::Registry)?;

        let mut matching: Vec<Armory> = self
            .store
            .armories()?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        matching.sort_by(|a, b| {
            a.name()
                .to_lowercase()
                .cmp(&b.name().to_lowercase())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });

        Ok(paginate(matching, pagination))
    }

    /// Single-document pipeline shared by the in-place mutations.
    fn mutate(
        &self,
        principal: &Principal,
        armory_id: ArmoryId,
        command: ArmoryCommand,
    ) -> Result<Armory, EngineError> {
        let mut tx = self.store.begin()?;
        let mut armory = tx
            .load_armory(armory_id)?
            .ok_or_else(|| EngineError::not_found(format!("armory {armory_id}")))?;
        let version_before = armory.version();

        let events = armory.handle(&command)?;
        if events.is_empty() {
            tx.abort();
            return Ok(armory);
        }
        for e in &events {
            armory.apply(e);
        }

        tx.put_armory(armory.clone(), ExpectedVersion::Exact(version_before))?;
        stage_events(
            &mut tx,
            *armory_id.as_uuid(),
            ARMORY_AGGREGATE,
            version_before,
            principal.user_id,
            &events,
        )?;
        commit_and_publish(tx, &self.bus)?;

        Ok(armory)
    }
}
