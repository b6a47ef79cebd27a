use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armsledger_core::{
    Aggregate, AggregateRoot, ArmoryId, DomainError, ItemId, OfficerId, UserId, short_tag,
};
use armsledger_events::Event;

use crate::item::{Condition, InventoryBatch, InventoryEntry, ItemKind};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmoryStatus {
    #[default]
    Active,
    Inactive,
    UnderMaintenance,
    Decommissioned,
}

/// Identity fields of an armory (everything except inventory and custody).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryProfile {
    pub name: String,
    pub code: String,
    pub location: String,
    pub unit: String,
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default)]
    pub status: ArmoryStatus,
}

impl ArmoryProfile {
    fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("code", &self.code),
            ("location", &self.location),
            ("unit", &self.unit),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Officer assigned as custodian (request shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianAssignment {
    pub officer_id: OfficerId,
    pub officer_name: String,
}

/// The officer currently accountable for an armory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custodian {
    pub officer_id: OfficerId,
    pub officer_name: String,
    pub took_over_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverKind {
    TakingOver,
    HandingOver,
}

/// One line of the append-only custody history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverRecord {
    pub kind: HandoverKind,
    pub officer_id: OfficerId,
    pub officer_name: String,
    pub at: DateTime<Utc>,
    pub recorded_by: UserId,
    pub remarks: Option<String>,
}

/// Full replacement of an armory's editable content (administrative correction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryCorrection {
    pub profile: ArmoryProfile,
    pub weapons: Vec<InventoryEntry>,
    pub ammunition: Vec<InventoryEntry>,
    pub equipment: Vec<InventoryEntry>,
    pub other_items: Vec<InventoryEntry>,
}

/// Aggregate root: Armory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Armory {
    id: ArmoryId,
    reference_id: String,
    profile: ArmoryProfile,
    weapons: Vec<InventoryEntry>,
    ammunition: Vec<InventoryEntry>,
    equipment: Vec<InventoryEntry>,
    other_items: Vec<InventoryEntry>,
    current_custodian: Option<Custodian>,
    handover_history: Vec<HandoverRecord>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Armory {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ArmoryId) -> Self {
        Self {
            id,
            reference_id: String::new(),
            profile: ArmoryProfile::default(),
            weapons: Vec::new(),
            ammunition: Vec::new(),
            equipment: Vec::new(),
            other_items: Vec::new(),
            current_custodian: None,
            handover_history: Vec::new(),
            created_by: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    /// Human-facing reference id: `ARM-XXXXXXXX`.
    pub fn reference_for(id: ArmoryId) -> String {
        format!("ARM-{}", short_tag(id.as_uuid()))
    }

    pub fn id_typed(&self) -> ArmoryId {
        self.id
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn profile(&self) -> &ArmoryProfile {
        &self.profile
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn code(&self) -> &str {
        &self.profile.code
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn current_custodian(&self) -> Option<&Custodian> {
        self.current_custodian.as_ref()
    }

    pub fn handover_history(&self) -> &[HandoverRecord] {
        &self.handover_history
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn entries(&self, kind: ItemKind) -> &[InventoryEntry] {
        match kind {
            ItemKind::Weapon => &self.weapons,
            ItemKind::Ammunition => &self.ammunition,
            ItemKind::Equipment => &self.equipment,
            ItemKind::Other => &self.other_items,
        }
    }

    fn entries_mut(&mut self, kind: ItemKind) -> &mut Vec<InventoryEntry> {
        match kind {
            ItemKind::Weapon => &mut self.weapons,
            ItemKind::Ammunition => &mut self.ammunition,
            ItemKind::Equipment => &mut self.equipment,
            ItemKind::Other => &mut self.other_items,
        }
    }

    /// Every entry across all four collections.
    pub fn all_entries(&self) -> impl Iterator<Item = &InventoryEntry> {
        ItemKind::ALL.into_iter().flat_map(move |k| self.entries(k).iter())
    }

    /// Locate an entry by item id in any collection.
    pub fn entry(&self, item_id: ItemId) -> Option<&InventoryEntry> {
        self.all_entries().find(|e| e.item_id == item_id)
    }

    /// Locate an entry by item id within one collection.
    pub fn entry_of(&self, kind: ItemKind, item_id: ItemId) -> Option<&InventoryEntry> {
        self.entries(kind).iter().find(|e| e.item_id == item_id)
    }

    fn entry_mut(&mut self, kind: ItemKind, item_id: ItemId) -> Option<&mut InventoryEntry> {
        self.entries_mut(kind).iter_mut().find(|e| e.item_id == item_id)
    }

    /// Case-insensitive name/code collision check against another armory.
    pub fn collides_with(&self, name: &str, code: &str) -> bool {
        self.profile.name.trim().eq_ignore_ascii_case(name.trim())
            || self.profile.code.trim().eq_ignore_ascii_case(code.trim())
    }
}

impl AggregateRoot for Armory {
    type Id = ArmoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateArmory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArmory {
    pub armory_id: ArmoryId,
    pub reference_id: String,
    pub profile: ArmoryProfile,
    pub custodian: Option<CustodianAssignment>,
    #[serde(default)]
    pub inventory: InventoryBatch,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AppendInventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendInventory {
    pub armory_id: ArmoryId,
    pub batch: InventoryBatch,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A quantity of one inventory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub kind: ItemKind,
    pub item_id: ItemId,
    pub quantity: u32,
}

/// Command: WithdrawStock (units leave the armory on a distribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStock {
    pub armory_id: ArmoryId,
    pub lines: Vec<StockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// A quantity coming back, optionally with a new condition for the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockLine {
    pub kind: ItemKind,
    pub item_id: ItemId,
    pub quantity: u32,
    pub condition: Option<Condition>,
}

/// Command: RestockItems (units come back from a distribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockItems {
    pub armory_id: ArmoryId,
    pub lines: Vec<RestockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectArmory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectArmory {
    pub armory_id: ArmoryId,
    pub correction: ArmoryCorrection,
    pub corrected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: HandOverCustody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandOverCustody {
    pub armory_id: ArmoryId,
    pub incoming: CustodianAssignment,
    pub remarks: Option<String>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveArmory (hard delete of the document).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveArmory {
    pub armory_id: ArmoryId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmoryCommand {
    Create(CreateArmory),
    AppendInventory(AppendInventory),
    WithdrawStock(WithdrawStock),
    RestockItems(RestockItems),
    Correct(CorrectArmory),
    HandOver(HandOverCustody),
    Remove(RemoveArmory),
}

/// Event: ArmoryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryCreated {
    pub armory_id: ArmoryId,
    pub reference_id: String,
    pub profile: ArmoryProfile,
    pub custodian: CustodianAssignment,
    pub entries: Vec<InventoryEntry>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InventoryAppended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAppended {
    pub armory_id: ArmoryId,
    pub entries: Vec<InventoryEntry>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockWithdrawn. Lines are merged per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWithdrawn {
    pub armory_id: ArmoryId,
    pub lines: Vec<StockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockRestocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRestocked {
    pub armory_id: ArmoryId,
    pub lines: Vec<RestockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ArmoryCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryCorrected {
    pub armory_id: ArmoryId,
    pub correction: ArmoryCorrection,
    pub corrected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CustodyHandedOver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyHandedOver {
    pub armory_id: ArmoryId,
    pub outgoing: Option<Custodian>,
    pub incoming: CustodianAssignment,
    pub remarks: Option<String>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ArmoryRemoved. `issued_units` is what was still out at removal time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryRemoved {
    pub armory_id: ArmoryId,
    pub reference_id: String,
    pub issued_units: u64,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmoryEvent {
    Created(ArmoryCreated),
    InventoryAppended(InventoryAppended),
    StockWithdrawn(StockWithdrawn),
    StockRestocked(StockRestocked),
    Corrected(ArmoryCorrected),
    CustodyHandedOver(CustodyHandedOver),
    Removed(ArmoryRemoved),
}

impl Event for ArmoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ArmoryEvent::Created(_) => "armory.created",
            ArmoryEvent::InventoryAppended(_) => "armory.inventory.appended",
            ArmoryEvent::StockWithdrawn(_) => "armory.stock.withdrawn",
            ArmoryEvent::StockRestocked(_) => "armory.stock.restocked",
            ArmoryEvent::Corrected(_) => "armory.corrected",
            ArmoryEvent::CustodyHandedOver(_) => "armory.custody.handed_over",
            ArmoryEvent::Removed(_) => "armory.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ArmoryEvent::Created(e) => e.occurred_at,
            ArmoryEvent::InventoryAppended(e) => e.occurred_at,
            ArmoryEvent::StockWithdrawn(e) => e.occurred_at,
            ArmoryEvent::StockRestocked(e) => e.occurred_at,
            ArmoryEvent::Corrected(e) => e.occurred_at,
            ArmoryEvent::CustodyHandedOver(e) => e.occurred_at,
            ArmoryEvent::Removed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Armory {
    type Command = ArmoryCommand;
    type Event = ArmoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ArmoryEvent::Created(e) => {
                self.id = e.armory_id;
                self.reference_id = e.reference_id.clone();
                self.profile = e.profile.clone();
                for entry in &e.entries {
                    self.entries_mut(entry.kind()).push(entry.clone());
                }
                self.current_custodian = Some(Custodian {
                    officer_id: e.custodian.officer_id,
                    officer_name: e.custodian.officer_name.clone(),
                    took_over_at: e.occurred_at,
                });
                self.handover_history.push(HandoverRecord {
                    kind: HandoverKind::TakingOver,
                    officer_id: e.custodian.officer_id,
                    officer_name: e.custodian.officer_name.clone(),
                    at: e.occurred_at,
                    recorded_by: e.created_by,
                    remarks: None,
                });
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ArmoryEvent::InventoryAppended(e) => {
                for entry in &e.entries {
                    self.entries_mut(entry.kind()).push(entry.clone());
                }
            }
            ArmoryEvent::StockWithdrawn(e) => {
                for line in &e.lines {
                    if let Some(entry) = self.entry_mut(line.kind, line.item_id) {
                        entry.available_quantity -= line.quantity;
                        entry.updated_at = e.occurred_at;
                    }
                }
            }
            ArmoryEvent::StockRestocked(e) => {
                for line in &e.lines {
                    if let Some(entry) = self.entry_mut(line.kind, line.item_id) {
                        entry.available_quantity += line.quantity;
                        if let Some(condition) = line.condition {
                            entry.condition = condition;
                        }
                        entry.updated_at = e.occurred_at;
                    }
                }
            }
            ArmoryEvent::Corrected(e) => {
                let c = &e.correction;
                self.profile = c.profile.clone();
                self.weapons = c.weapons.clone();
                self.ammunition = c.ammunition.clone();
                self.equipment = c.equipment.clone();
                self.other_items = c.other_items.clone();
            }
            ArmoryEvent::CustodyHandedOver(e) => {
                if let Some(outgoing) = &e.outgoing {
                    self.handover_history.push(HandoverRecord {
                        kind: HandoverKind::HandingOver,
                        officer_id: outgoing.officer_id,
                        officer_name: outgoing.officer_name.clone(),
                        at: e.occurred_at,
                        recorded_by: e.recorded_by,
                        remarks: e.remarks.clone(),
                    });
                }
                self.handover_history.push(HandoverRecord {
                    kind: HandoverKind::TakingOver,
                    officer_id: e.incoming.officer_id,
                    officer_name: e.incoming.officer_name.clone(),
                    at: e.occurred_at,
                    recorded_by: e.recorded_by,
                    remarks: e.remarks.clone(),
                });
                self.current_custodian = Some(Custodian {
                    officer_id: e.incoming.officer_id,
                    officer_name: e.incoming.officer_name.clone(),
                    took_over_at: e.occurred_at,
                });
            }
            ArmoryEvent::Removed(_) => {
                self.created = false;
            }
        }

        self.updated_at = Some(event.occurred_at());
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ArmoryCommand::Create(cmd) => self.handle_create(cmd),
            ArmoryCommand::AppendInventory(cmd) => self.handle_append(cmd),
            ArmoryCommand::WithdrawStock(cmd) => self.handle_withdraw(cmd),
            ArmoryCommand::RestockItems(cmd) => self.handle_restock(cmd),
            ArmoryCommand::Correct(cmd) => self.handle_correct(cmd),
            ArmoryCommand::HandOver(cmd) => self.handle_hand_over(cmd),
            ArmoryCommand::Remove(cmd) => self.handle_remove(cmd),
        }
    }
}

impl Armory {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("armory {}", self.id)));
        }
        Ok(())
    }

    fn ensure_armory_id(&self, armory_id: ArmoryId) -> Result<(), DomainError> {
        if self.id != armory_id {
            return Err(DomainError::invariant("armory_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateArmory) -> Result<Vec<ArmoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("armory already exists"));
        }
        self.ensure_armory_id(cmd.armory_id)?;
        cmd.profile.validate().map_err(DomainError::invalid_input)?;

        let custodian = match &cmd.custodian {
            Some(c) if !c.officer_name.trim().is_empty() => c.clone(),
            Some(_) => return Err(DomainError::invalid_input("custodian name cannot be empty")),
            None => return Err(DomainError::invalid_input("an initial custodian is required")),
        };

        let entries = self.stamp_batch(&cmd.inventory, cmd.created_by, cmd.occurred_at)?;

        Ok(vec![ArmoryEvent::Created(ArmoryCreated {
            armory_id: cmd.armory_id,
            reference_id: cmd.reference_id.clone(),
            profile: cmd.profile.clone(),
            custodian,
            entries,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_append(&self, cmd: &AppendInventory) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        if cmd.batch.is_empty() {
            return Err(DomainError::invalid_input(
                "at least one of weapons, ammunition, equipment or other items is required",
            ));
        }

        let entries = self.stamp_batch(&cmd.batch, cmd.added_by, cmd.occurred_at)?;

        Ok(vec![ArmoryEvent::InventoryAppended(InventoryAppended {
            armory_id: cmd.armory_id,
            entries,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Validate new entries and stamp them with creator + timestamp.
    fn stamp_batch(
        &self,
        batch: &InventoryBatch,
        by: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<InventoryEntry>, DomainError> {
        let mut seen: HashSet<ItemId> = self.all_entries().map(|e| e.item_id).collect();
        let mut entries = Vec::new();

        for (kind, group) in batch.groups() {
            for new in group {
                if new.details.kind() != kind {
                    return Err(DomainError::invalid_input(format!(
                        "{} entry listed under {kind}",
                        new.details.kind()
                    )));
                }
                if new.details.name().trim().is_empty() {
                    return Err(DomainError::invalid_input("item name cannot be empty"));
                }
                if new.quantity == 0 {
                    return Err(DomainError::invalid_input("item quantity must be positive"));
                }
                if new.available_quantity.is_some_and(|a| a > new.quantity) {
                    return Err(DomainError::invalid_input(
                        "available quantity cannot exceed quantity",
                    ));
                }
                if !seen.insert(new.item_id) {
                    return Err(DomainError::invalid_input(format!(
                        "duplicate item id {}",
                        new.item_id
                    )));
                }
                entries.push(new.clone().into_entry(by, at));
            }
        }

        Ok(entries)
    }

    fn handle_withdraw(&self, cmd: &WithdrawStock) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::invalid_input("no items requested"));
        }

        // Merge repeated requests for the same entry before checking stock.
        let mut merged: BTreeMap<(ItemKind, ItemId), u32> = BTreeMap::new();
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::invalid_input(format!(
                    "quantity for item {} must be positive",
                    line.item_id
                )));
            }
            let slot = merged.entry((line.kind, line.item_id)).or_insert(0);
            *slot = slot.saturating_add(line.quantity);
        }

        let mut lines = Vec::with_capacity(merged.len());
        for ((kind, item_id), quantity) in merged {
            let entry = self
                .entry_of(kind, item_id)
                .ok_or_else(|| DomainError::not_found(format!("{kind} item {item_id}")))?;
            if quantity > entry.available_quantity {
                return Err(DomainError::insufficient_stock(
                    item_id,
                    quantity,
                    entry.available_quantity,
                ));
            }
            lines.push(StockLine {
                kind,
                item_id,
                quantity,
            });
        }

        Ok(vec![ArmoryEvent::StockWithdrawn(StockWithdrawn {
            armory_id: cmd.armory_id,
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &RestockItems) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        let mut pending: BTreeMap<(ItemKind, ItemId), u32> = BTreeMap::new();
        for line in &cmd.lines {
            let entry = self
                .entry_of(line.kind, line.item_id)
                .ok_or_else(|| DomainError::not_found(format!("{} item {}", line.kind, line.item_id)))?;
            let slot = pending.entry((line.kind, line.item_id)).or_insert(0);
            *slot = slot.saturating_add(line.quantity);
            if *slot > entry.issued_quantity() {
                return Err(DomainError::invariant(format!(
                    "restocking {} units of item {} would exceed its quantity",
                    slot, line.item_id
                )));
            }
        }

        if cmd.lines.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![ArmoryEvent::StockRestocked(StockRestocked {
            armory_id: cmd.armory_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_correct(&self, cmd: &CorrectArmory) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        let c = &cmd.correction;
        c.profile.validate().map_err(DomainError::validation)?;

        let mut seen = HashSet::new();
        for (kind, entries) in [
            (ItemKind::Weapon, &c.weapons),
            (ItemKind::Ammunition, &c.ammunition),
            (ItemKind::Equipment, &c.equipment),
            (ItemKind::Other, &c.other_items),
        ] {
            for entry in entries {
                if entry.kind() != kind {
                    return Err(DomainError::validation(format!(
                        "item {} is a {} but listed under {kind}",
                        entry.item_id,
                        entry.kind()
                    )));
                }
                if entry.details.name().trim().is_empty() {
                    return Err(DomainError::validation("item name cannot be empty"));
                }
                if entry.available_quantity > entry.quantity {
                    return Err(DomainError::validation(format!(
                        "item {}: available quantity {} exceeds quantity {}",
                        entry.item_id, entry.available_quantity, entry.quantity
                    )));
                }
                if !seen.insert(entry.item_id) {
                    return Err(DomainError::validation(format!("duplicate item id {}", entry.item_id)));
                }

                let existing = self.entry(entry.item_id);
                if let Some(existing) = existing.filter(|e| e.kind() != kind) {
                    return Err(DomainError::validation(format!(
                        "item {} cannot change kind ({} -> {kind})",
                        entry.item_id,
                        existing.kind()
                    )));
                }

                // Units out on distributions are owned by the ledger, not by corrections.
                let issued_before = existing.map(InventoryEntry::issued_quantity);
                let issued_after = entry.issued_quantity();
                match issued_before {
                    Some(before) if before != issued_after => {
                        return Err(DomainError::validation(format!(
                            "item {}: correction changes the issued count ({before} -> {issued_after})",
                            entry.item_id
                        )));
                    }
                    None if issued_after != 0 => {
                        return Err(DomainError::validation(format!(
                            "new item {} cannot start with units issued",
                            entry.item_id
                        )));
                    }
                    _ => {}
                }
            }
        }

        if let Some(missing) = self.all_entries().find(|e| !seen.contains(&e.item_id)) {
            return Err(DomainError::validation(format!(
                "inventory entries cannot be removed (missing item {})",
                missing.item_id
            )));
        }

        Ok(vec![ArmoryEvent::Corrected(ArmoryCorrected {
            armory_id: cmd.armory_id,
            correction: c.clone(),
            corrected_by: cmd.corrected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_hand_over(&self, cmd: &HandOverCustody) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        if cmd.incoming.officer_name.trim().is_empty() {
            return Err(DomainError::invalid_input("custodian name cannot be empty"));
        }
        if self
            .current_custodian
            .as_ref()
            .is_some_and(|c| c.officer_id == cmd.incoming.officer_id)
        {
            return Err(DomainError::invalid_input("officer is already the custodian"));
        }

        Ok(vec![ArmoryEvent::CustodyHandedOver(CustodyHandedOver {
            armory_id: cmd.armory_id,
            outgoing: self.current_custodian.clone(),
            incoming: cmd.incoming.clone(),
            remarks: cmd.remarks.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveArmory) -> Result<Vec<ArmoryEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_armory_id(cmd.armory_id)?;

        Ok(vec![ArmoryEvent::Removed(ArmoryRemoved {
            armory_id: cmd.armory_id,
            reference_id: self.reference_id.clone(),
            issued_units: self.all_entries().map(|e| u64::from(e.issued_quantity())).sum(),
            removed_by: cmd.removed_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Handle a command and apply the resulting events in one step.
pub fn execute(armory: &mut Armory, command: &ArmoryCommand) -> Result<Vec<ArmoryEvent>, DomainError> {
    let events = armory.handle(command)?;
    for e in &events {
        armory.apply(e);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemDetails, NewInventoryEntry};
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn rifle(quantity: u32) -> NewInventoryEntry {
        NewInventoryEntry::new(
            ItemDetails::Weapon {
                name: "Service rifle".to_string(),
                weapon_type: "rifle".to_string(),
                make: Some("Acme".to_string()),
                model: Some("R-5".to_string()),
                caliber: Some("5.56".to_string()),
                serial_numbers: vec![],
            },
            quantity,
        )
    }

    fn rounds(quantity: u32) -> NewInventoryEntry {
        NewInventoryEntry::new(
            ItemDetails::Ammunition {
                name: "Ball".to_string(),
                caliber: "5.56".to_string(),
                ammunition_type: None,
                lot_number: Some("L-1".to_string()),
            },
            quantity,
        )
    }

    fn profile() -> ArmoryProfile {
        ArmoryProfile {
            name: "North Armory".to_string(),
            code: "NA-01".to_string(),
            location: "Block C".to_string(),
            unit: "1st Patrol".to_string(),
            security_level: SecurityLevel::High,
            status: ArmoryStatus::Active,
        }
    }

    fn custodian() -> CustodianAssignment {
        CustodianAssignment {
            officer_id: OfficerId::new(),
            officer_name: "Sgt. Ade".to_string(),
        }
    }

    fn created(batch: InventoryBatch) -> Armory {
        let id = ArmoryId::new();
        let mut armory = Armory::empty(id);
        execute(
            &mut armory,
            &ArmoryCommand::Create(CreateArmory {
                armory_id: id,
                reference_id: "ARM-TEST".to_string(),
                profile: profile(),
                custodian: Some(custodian()),
                inventory: batch,
                created_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        armory
    }

    fn withdraw(armory: &Armory, kind: ItemKind, item_id: ItemId, quantity: u32) -> ArmoryCommand {
        ArmoryCommand::WithdrawStock(WithdrawStock {
            armory_id: armory.id_typed(),
            lines: vec![StockLine {
                kind,
                item_id,
                quantity,
            }],
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_seeds_custody_history_with_taking_over() {
        let armory = created(InventoryBatch::default());
        assert_eq!(armory.version(), 1);
        assert_eq!(armory.handover_history().len(), 1);
        assert_eq!(armory.handover_history()[0].kind, HandoverKind::TakingOver);
        assert!(armory.current_custodian().is_some());
    }

    #[test]
    fn reference_ids_use_the_uuid_tail() {
        let reference = Armory::reference_for(ArmoryId::new());
        assert!(reference.starts_with("ARM-"));
        assert_eq!(reference.len(), "ARM-".len() + 8);
    }

    #[test]
    fn remove_reports_units_still_out() {
        let entry = rifle(4);
        let item_id = entry.item_id;
        let mut armory = created(InventoryBatch {
            weapons: vec![entry],
            ..InventoryBatch::default()
        });
        let cmd = withdraw(&armory, ItemKind::Weapon, item_id, 3);
        execute(&mut armory, &cmd).unwrap();

        let armory_id = armory.id_typed();
        let events = execute(
            &mut armory,
            &ArmoryCommand::Remove(RemoveArmory {
                armory_id,
                removed_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let ArmoryEvent::Removed(removed) = &events[0] else {
            panic!("expected a removal event");
        };
        assert_eq!(removed.issued_units, 3);
        assert!(!armory.is_created());
    }

    #[test]
    fn create_without_custodian_is_invalid_input() {
        let id = ArmoryId::new();
        let err = Armory::empty(id)
            .handle(&ArmoryCommand::Create(CreateArmory {
                armory_id: id,
                reference_id: "ARM-X".to_string(),
                profile: profile(),
                custodian: None,
                inventory: InventoryBatch::default(),
                created_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn append_rejects_empty_batch() {
        let armory = created(InventoryBatch::default());
        let err = armory
            .handle(&ArmoryCommand::AppendInventory(AppendInventory {
                armory_id: armory.id_typed(),
                batch: InventoryBatch::default(),
                added_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn append_on_missing_armory_is_not_found() {
        let armory = Armory::empty(ArmoryId::new());
        let err = armory
            .handle(&ArmoryCommand::AppendInventory(AppendInventory {
                armory_id: armory.id_typed(),
                batch: InventoryBatch {
                    weapons: vec![rifle(1)],
                    ..InventoryBatch::default()
                },
                added_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn append_stamps_creator_and_defaults_availability() {
        let mut armory = created(InventoryBatch::default());
        let by = UserId::new();
        let armory_id = armory.id_typed();
        execute(
            &mut armory,
            &ArmoryCommand::AppendInventory(AppendInventory {
                armory_id,
                batch: InventoryBatch {
                    ammunition: vec![rounds(500)],
                    ..InventoryBatch::default()
                },
                added_by: by,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let entry = &armory.entries(ItemKind::Ammunition)[0];
        assert_eq!(entry.created_by, by);
        assert_eq!(entry.quantity, 500);
        assert_eq!(entry.available_quantity, 500);
    }

    #[test]
    fn append_rejects_entry_in_wrong_collection() {
        let armory = created(InventoryBatch::default());
        let err = armory
            .handle(&ArmoryCommand::AppendInventory(AppendInventory {
                armory_id: armory.id_typed(),
                batch: InventoryBatch {
                    equipment: vec![rifle(1)],
                    ..InventoryBatch::default()
                },
                added_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn withdraw_beyond_available_is_insufficient_stock() {
        let armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;

        let err = armory.handle(&withdraw(&armory, ItemKind::Weapon, item, 10)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(item, 10, 5));
    }

    #[test]
    fn withdraw_merges_duplicate_lines_before_checking() {
        let armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;
        let line = StockLine {
            kind: ItemKind::Weapon,
            item_id: item,
            quantity: 3,
        };

        let err = armory
            .handle(&ArmoryCommand::WithdrawStock(WithdrawStock {
                armory_id: armory.id_typed(),
                lines: vec![line.clone(), line],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { requested: 6, .. }));
    }

    #[test]
    fn restock_updates_availability_and_condition() {
        let mut armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;
        let cmd = withdraw(&armory, ItemKind::Weapon, item, 2);
        execute(&mut armory, &cmd).unwrap();

        let armory_id = armory.id_typed();
        execute(
            &mut armory,
            &ArmoryCommand::RestockItems(RestockItems {
                armory_id,
                lines: vec![RestockLine {
                    kind: ItemKind::Weapon,
                    item_id: item,
                    quantity: 1,
                    condition: Some(Condition::UnderMaintenance),
                }],
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let entry = armory.entry(item).unwrap();
        assert_eq!(entry.available_quantity, 4);
        assert_eq!(entry.condition, Condition::UnderMaintenance);
    }

    #[test]
    fn restock_cannot_exceed_issued_units() {
        let armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;
        let err = armory
            .handle(&ArmoryCommand::RestockItems(RestockItems {
                armory_id: armory.id_typed(),
                lines: vec![RestockLine {
                    kind: ItemKind::Weapon,
                    item_id: item,
                    quantity: 1,
                    condition: None,
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    fn correction_of(armory: &Armory) -> ArmoryCorrection {
        ArmoryCorrection {
            profile: armory.profile().clone(),
            weapons: armory.entries(ItemKind::Weapon).to_vec(),
            ammunition: armory.entries(ItemKind::Ammunition).to_vec(),
            equipment: armory.entries(ItemKind::Equipment).to_vec(),
            other_items: armory.entries(ItemKind::Other).to_vec(),
        }
    }

    fn correct(armory: &Armory, correction: ArmoryCorrection) -> Result<Vec<ArmoryEvent>, DomainError> {
        armory.handle(&ArmoryCommand::Correct(CorrectArmory {
            armory_id: armory.id_typed(),
            correction,
            corrected_by: UserId::new(),
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn correction_may_rename_and_add_stock() {
        let mut armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let mut c = correction_of(&armory);
        c.profile.name = "North Armory (annex)".to_string();
        c.weapons[0].quantity = 7;
        c.weapons[0].available_quantity = 7;

        let events = correct(&armory, c).unwrap();
        for e in &events {
            armory.apply(e);
        }
        assert_eq!(armory.name(), "North Armory (annex)");
        assert_eq!(armory.entries(ItemKind::Weapon)[0].quantity, 7);
    }

    #[test]
    fn correction_rejects_schema_violations() {
        let armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });

        let mut over = correction_of(&armory);
        over.weapons[0].available_quantity = 6;
        assert!(matches!(correct(&armory, over), Err(DomainError::Validation(_))));

        let mut removed = correction_of(&armory);
        removed.weapons.clear();
        assert!(matches!(correct(&armory, removed), Err(DomainError::Validation(_))));

        let mut blank = correction_of(&armory);
        blank.profile.code = "  ".to_string();
        assert!(matches!(correct(&armory, blank), Err(DomainError::Validation(_))));
    }

    #[test]
    fn correction_cannot_move_an_entry_to_another_collection() {
        let mut armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;
        let cmd = withdraw(&armory, ItemKind::Weapon, item, 2);
        execute(&mut armory, &cmd).unwrap();

        // Re-file the rifle as equipment with everything back on the shelf.
        let mut c = correction_of(&armory);
        let mut moved = c.weapons.remove(0);
        moved.details = ItemDetails::Equipment {
            name: "Service rifle".to_string(),
            equipment_type: None,
            model: None,
        };
        moved.available_quantity = moved.quantity;
        c.equipment.push(moved);

        let err = correct(&armory, c).unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref msg) if msg.contains("cannot change kind")));
        assert_eq!(armory.entry_of(ItemKind::Weapon, item).unwrap().issued_quantity(), 2);
    }

    #[test]
    fn correction_cannot_touch_issued_units() {
        let mut armory = created(InventoryBatch {
            weapons: vec![rifle(5)],
            ..InventoryBatch::default()
        });
        let item = armory.entries(ItemKind::Weapon)[0].item_id;
        let cmd = withdraw(&armory, ItemKind::Weapon, item, 2);
        execute(&mut armory, &cmd).unwrap();

        let mut c = correction_of(&armory);
        c.weapons[0].available_quantity = 5;
        assert!(matches!(correct(&armory, c), Err(DomainError::Validation(_))));
    }

    #[test]
    fn hand_over_records_both_sides() {
        let mut armory = created(InventoryBatch::default());
        let incoming = custodian();
        let armory_id = armory.id_typed();
        execute(
            &mut armory,
            &ArmoryCommand::HandOver(HandOverCustody {
                armory_id,
                incoming: incoming.clone(),
                remarks: Some("rotation".to_string()),
                recorded_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let kinds: Vec<_> = armory.handover_history().iter().map(|h| h.kind).collect();
        assert_eq!(
            kinds,
            vec![HandoverKind::TakingOver, HandoverKind::HandingOver, HandoverKind::TakingOver]
        );
        assert_eq!(armory.current_custodian().unwrap().officer_id, incoming.officer_id);
    }

    #[test]
    fn collision_check_ignores_case_and_whitespace() {
        let armory = created(InventoryBatch::default());
        assert!(armory.collides_with(" north armory ", "zz"));
        assert!(armory.collides_with("other", "na-01"));
        assert!(!armory.collides_with("other", "zz"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any interleaving of withdrawals and restocks that the
        /// aggregate accepts keeps 0 <= available <= quantity.
        #[test]
        fn availability_stays_within_quantity(
            quantity in 1u32..50,
            ops in prop::collection::vec((any::<bool>(), 1u32..20), 1..40)
        ) {
            let mut armory = created(InventoryBatch {
                weapons: vec![rifle(quantity)],
                ..InventoryBatch::default()
            });
            let item = armory.entries(ItemKind::Weapon)[0].item_id;

            for (is_withdraw, qty) in ops {
                let cmd = if is_withdraw {
                    withdraw(&armory, ItemKind::Weapon, item, qty)
                } else {
                    ArmoryCommand::RestockItems(RestockItems {
                        armory_id: armory.id_typed(),
                        lines: vec![RestockLine {
                            kind: ItemKind::Weapon,
                            item_id: item,
                            quantity: qty,
                            condition: None,
                        }],
                        occurred_at: test_time(),
                    })
                };
                let _ = execute(&mut armory, &cmd);

                let entry = armory.entry(item).unwrap();
                prop_assert!(entry.available_quantity <= entry.quantity);
            }
        }
    }
}
