use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use armsledger_armory::{Condition, ItemKind, ItemSnapshot};
use armsledger_core::{
    Aggregate, AggregateRoot, ArmoryId, DistributionId, DomainError, ItemId, OfficerId, UserId,
    short_tag,
};
use armsledger_events::Event;

use crate::status::{DistributionStatus, Totals, derive_status};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalStatus {
    #[default]
    None,
    Pending,
    Renewed,
}

/// One issued line: what left the armory, and how much of it has come back.
///
/// Invariant: `returned_quantity <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedItem {
    pub item_ref: ItemId,
    pub item_snapshot: ItemSnapshot,
    pub quantity: u32,
    pub returned_quantity: u32,
    pub condition_at_return: Option<Condition>,
}

impl IssuedItem {
    pub fn outstanding(&self) -> u32 {
        self.quantity.saturating_sub(self.returned_quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalRecord {
    pub renewed_at: DateTime<Utc>,
    pub renewed_by: UserId,
    pub next_renewal_date: DateTime<Utc>,
    pub condition: Option<Condition>,
    pub remarks: Option<String>,
}

/// Aggregate root: Distribution.
///
/// `status` is persisted for querying but always recomputed from the issued
/// arrays (plus the overdue flag) whenever they change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    id: DistributionId,
    distribution_no: String,
    armory_id: ArmoryId,
    officer_id: OfficerId,
    squad_name: Option<String>,
    remarks: Option<String>,
    weapons_issued: Vec<IssuedItem>,
    ammunition_issued: Vec<IssuedItem>,
    equipment_issued: Vec<IssuedItem>,
    other_items_issued: Vec<IssuedItem>,
    date_issued: Option<DateTime<Utc>>,
    return_date: Option<DateTime<Utc>>,
    issued_by: Option<UserId>,
    returned_by: Option<UserId>,
    status: DistributionStatus,
    overdue: bool,
    renewal_due: Option<DateTime<Utc>>,
    renewal_status: RenewalStatus,
    renewal_history: Vec<RenewalRecord>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Distribution {
    /// Create an empty, not-yet-issued aggregate instance.
    pub fn empty(id: DistributionId) -> Self {
        Self {
            id,
            distribution_no: String::new(),
            armory_id: ArmoryId::from_uuid(Uuid::nil()),
            officer_id: OfficerId::from_uuid(Uuid::nil()),
            squad_name: None,
            remarks: None,
            weapons_issued: Vec::new(),
            ammunition_issued: Vec::new(),
            equipment_issued: Vec::new(),
            other_items_issued: Vec::new(),
            date_issued: None,
            return_date: None,
            issued_by: None,
            returned_by: None,
            status: DistributionStatus::Issued,
            overdue: false,
            renewal_due: None,
            renewal_status: RenewalStatus::None,
            renewal_history: Vec::new(),
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    /// Human-facing distribution number: `DST-YYYYMMDD-XXXXXXXX`.
    pub fn number_for(id: DistributionId, at: DateTime<Utc>) -> String {
        format!("DST-{}-{}", at.format("%Y%m%d"), short_tag(id.as_uuid()))
    }

    pub fn id_typed(&self) -> DistributionId {
        self.id
    }

    pub fn distribution_no(&self) -> &str {
        &self.distribution_no
    }

    pub fn armory_id(&self) -> ArmoryId {
        self.armory_id
    }

    pub fn officer_id(&self) -> OfficerId {
        self.officer_id
    }

    pub fn squad_name(&self) -> Option<&str> {
        self.squad_name.as_deref()
    }

    pub fn remarks(&self) -> Option<&str> {
        self.remarks.as_deref()
    }

    pub fn date_issued(&self) -> Option<DateTime<Utc>> {
        self.date_issued
    }

    pub fn return_date(&self) -> Option<DateTime<Utc>> {
        self.return_date
    }

    pub fn issued_by(&self) -> Option<UserId> {
        self.issued_by
    }

    pub fn returned_by(&self) -> Option<UserId> {
        self.returned_by
    }

    pub fn status(&self) -> DistributionStatus {
        self.status
    }

    pub fn renewal_due(&self) -> Option<DateTime<Utc>> {
        self.renewal_due
    }

    pub fn renewal_status(&self) -> RenewalStatus {
        self.renewal_status
    }

    pub fn renewal_history(&self) -> &[RenewalRecord] {
        &self.renewal_history
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn issued(&self, kind: ItemKind) -> &[IssuedItem] {
        match kind {
            ItemKind::Weapon => &self.weapons_issued,
            ItemKind::Ammunition => &self.ammunition_issued,
            ItemKind::Equipment => &self.equipment_issued,
            ItemKind::Other => &self.other_items_issued,
        }
    }

    fn issued_mut(&mut self, kind: ItemKind) -> &mut Vec<IssuedItem> {
        match kind {
            ItemKind::Weapon => &mut self.weapons_issued,
            ItemKind::Ammunition => &mut self.ammunition_issued,
            ItemKind::Equipment => &mut self.equipment_issued,
            ItemKind::Other => &mut self.other_items_issued,
        }
    }

    /// Every issued sub-entry with the collection it belongs to.
    pub fn all_issued(&self) -> impl Iterator<Item = (ItemKind, &IssuedItem)> {
        ItemKind::ALL
            .into_iter()
            .flat_map(move |k| self.issued(k).iter().map(move |i| (k, i)))
    }

    /// Sub-entries that still have units out with the officer.
    pub fn outstanding_items(&self) -> impl Iterator<Item = (ItemKind, &IssuedItem)> {
        self.all_issued().filter(|(_, i)| i.outstanding() > 0)
    }

    pub fn totals(&self) -> Totals {
        self.all_issued().fold(Totals::default(), |acc, (_, i)| Totals {
            issued: acc.issued + u64::from(i.quantity),
            returned: acc.returned + u64::from(i.returned_quantity),
        })
    }

    /// Outstanding units of one armory item on this distribution.
    pub fn outstanding_for(&self, item_ref: ItemId) -> u32 {
        self.all_issued()
            .filter(|(_, i)| i.item_ref == item_ref)
            .map(|(_, i)| i.outstanding())
            .sum()
    }

    pub fn is_outstanding(&self) -> bool {
        self.totals().outstanding() > 0
    }

    fn recompute_status(&mut self) {
        self.status = derive_status(self.totals(), self.overdue);
    }

    /// Work out how a batch of returns lands on this distribution.
    ///
    /// Each line is clamped to what is still outstanding for its item
    /// (counting earlier lines of the same batch). Unknown item refs fail.
    pub fn plan_return(&self, lines: &[ReturnLine]) -> Result<ReturnPlan, DomainError> {
        let mut consumed: BTreeMap<(ItemKind, ItemId), u32> = BTreeMap::new();
        let mut planned = Vec::with_capacity(lines.len());

        for line in lines {
            let issued = self
                .issued(line.kind)
                .iter()
                .find(|i| i.item_ref == line.item_ref)
                .ok_or_else(|| {
                    DomainError::not_found(format!(
                        "{} item {} on distribution {}",
                        line.kind, line.item_ref, self.distribution_no
                    ))
                })?;

            let already = consumed.entry((line.kind, line.item_ref)).or_insert(0);
            let remaining = issued.outstanding().saturating_sub(*already);
            let applied = line.quantity.min(remaining);
            *already += applied;

            planned.push(AppliedReturn {
                kind: line.kind,
                item_ref: line.item_ref,
                requested: line.quantity,
                applied,
                condition: line.condition,
            });
        }

        Ok(ReturnPlan { lines: planned })
    }
}

impl AggregateRoot for Distribution {
    type Id = DistributionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A line of an issue request after the armory has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLine {
    pub kind: ItemKind,
    pub item_ref: ItemId,
    pub snapshot: ItemSnapshot,
    pub quantity: u32,
}

/// Command: IssueDistribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDistribution {
    pub distribution_id: DistributionId,
    pub distribution_no: String,
    pub armory_id: ArmoryId,
    pub officer_id: OfficerId,
    pub lines: Vec<IssueLine>,
    pub squad_name: Option<String>,
    pub remarks: Option<String>,
    pub renewal_due: Option<DateTime<Utc>>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// A requested return: `{itemType, itemRef, quantity, condition}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub kind: ItemKind,
    pub item_ref: ItemId,
    pub quantity: u32,
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// What a return line actually did after clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedReturn {
    pub kind: ItemKind,
    pub item_ref: ItemId,
    pub requested: u32,
    pub applied: u32,
    pub condition: Option<Condition>,
}

impl AppliedReturn {
    pub fn is_clamped(&self) -> bool {
        self.applied < self.requested
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPlan {
    pub lines: Vec<AppliedReturn>,
}

impl ReturnPlan {
    /// True when any line was reduced to fit the outstanding quantity.
    pub fn clamped(&self) -> bool {
        self.lines.iter().any(AppliedReturn::is_clamped)
    }

    pub fn applied_total(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.applied)).sum()
    }

    /// Lines that move units (a zero-unit line changes nothing).
    pub fn effective(&self) -> impl Iterator<Item = &AppliedReturn> {
        self.lines.iter().filter(|l| l.applied > 0)
    }
}

/// Command: RecordReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReturn {
    pub distribution_id: DistributionId,
    pub lines: Vec<ReturnLine>,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalRequest {
    pub next_renewal_date: DateTime<Utc>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Command: Renew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renew {
    pub distribution_id: DistributionId,
    pub renewal: RenewalRequest,
    pub renewed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Fields the administrative patch may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPatch {
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub status: Option<DistributionStatus>,
    #[serde(default)]
    pub squad_name: Option<String>,
    #[serde(default)]
    pub renewal_status: Option<RenewalStatus>,
}

impl DistributionPatch {
    pub fn is_empty(&self) -> bool {
        self.remarks.is_none()
            && self.status.is_none()
            && self.squad_name.is_none()
            && self.renewal_status.is_none()
    }
}

/// Command: PatchDistribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDistribution {
    pub distribution_id: DistributionId,
    pub patch: DistributionPatch,
    pub patched_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkOverdue (sweep step for one distribution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkOverdue {
    pub distribution_id: DistributionId,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionCommand {
    Issue(IssueDistribution),
    RecordReturn(RecordReturn),
    Renew(Renew),
    Patch(PatchDistribution),
    MarkOverdue(MarkOverdue),
}

/// Event: DistributionIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionIssued {
    pub distribution_id: DistributionId,
    pub distribution_no: String,
    pub armory_id: ArmoryId,
    pub officer_id: OfficerId,
    pub lines: Vec<IssueLine>,
    pub squad_name: Option<String>,
    pub remarks: Option<String>,
    pub renewal_due: Option<DateTime<Utc>>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRecorded. Only lines that moved units are carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecorded {
    pub distribution_id: DistributionId,
    pub lines: Vec<AppliedReturn>,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Renewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renewed {
    pub distribution_id: DistributionId,
    pub record: RenewalRecord,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patched {
    pub distribution_id: DistributionId,
    pub patch: DistributionPatch,
    pub patched_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MarkedOverdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedOverdue {
    pub distribution_id: DistributionId,
    pub renewal_due: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionEvent {
    Issued(DistributionIssued),
    ReturnRecorded(ReturnRecorded),
    Renewed(Renewed),
    Patched(Patched),
    MarkedOverdue(MarkedOverdue),
}

impl Event for DistributionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DistributionEvent::Issued(_) => "distribution.issued",
            DistributionEvent::ReturnRecorded(_) => "distribution.return_recorded",
            DistributionEvent::Renewed(_) => "distribution.renewed",
            DistributionEvent::Patched(_) => "distribution.patched",
            DistributionEvent::MarkedOverdue(_) => "distribution.marked_overdue",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DistributionEvent::Issued(e) => e.occurred_at,
            DistributionEvent::ReturnRecorded(e) => e.occurred_at,
            DistributionEvent::Renewed(e) => e.occurred_at,
            DistributionEvent::Patched(e) => e.occurred_at,
            DistributionEvent::MarkedOverdue(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Distribution {
    type Command = DistributionCommand;
    type Event = DistributionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DistributionEvent::Issued(e) => {
                self.id = e.distribution_id;
                self.distribution_no = e.distribution_no.clone();
                self.armory_id = e.armory_id;
                self.officer_id = e.officer_id;
                self.squad_name = e.squad_name.clone();
                self.remarks = e.remarks.clone();
                for line in &e.lines {
                    self.issued_mut(line.kind).push(IssuedItem {
                        item_ref: line.item_ref,
                        item_snapshot: line.snapshot.clone(),
                        quantity: line.quantity,
                        returned_quantity: 0,
                        condition_at_return: None,
                    });
                }
                self.date_issued = Some(e.occurred_at);
                self.issued_by = Some(e.issued_by);
                self.renewal_due = e.renewal_due;
                self.created = true;
            }
            DistributionEvent::ReturnRecorded(e) => {
                for line in &e.lines {
                    if let Some(item) = self
                        .issued_mut(line.kind)
                        .iter_mut()
                        .find(|i| i.item_ref == line.item_ref)
                    {
                        item.returned_quantity = (item.returned_quantity + line.applied).min(item.quantity);
                        if line.condition.is_some() {
                            item.condition_at_return = line.condition;
                        }
                    }
                }
                if !e.lines.is_empty() {
                    self.return_date = Some(e.occurred_at);
                    self.returned_by = Some(e.returned_by);
                }
            }
            DistributionEvent::Renewed(e) => {
                self.renewal_due = Some(e.record.next_renewal_date);
                self.renewal_status = RenewalStatus::Renewed;
                self.renewal_history.push(e.record.clone());
                self.overdue = false;
            }
            DistributionEvent::Patched(e) => {
                if let Some(remarks) = &e.patch.remarks {
                    self.remarks = Some(remarks.clone());
                }
                if let Some(squad) = &e.patch.squad_name {
                    self.squad_name = Some(squad.clone());
                }
                if let Some(renewal_status) = e.patch.renewal_status {
                    self.renewal_status = renewal_status;
                }
                if let Some(status) = e.patch.status {
                    self.overdue = status == DistributionStatus::Overdue;
                }
            }
            DistributionEvent::MarkedOverdue(_) => {
                self.overdue = true;
                self.renewal_status = RenewalStatus::Pending;
            }
        }

        self.recompute_status();
        self.updated_at = Some(event.occurred_at());
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DistributionCommand::Issue(cmd) => self.handle_issue(cmd),
            DistributionCommand::RecordReturn(cmd) => self.handle_return(cmd),
            DistributionCommand::Renew(cmd) => self.handle_renew(cmd),
            DistributionCommand::Patch(cmd) => self.handle_patch(cmd),
            DistributionCommand::MarkOverdue(cmd) => self.handle_mark_overdue(cmd),
        }
    }
}

impl Distribution {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("distribution {}", self.id)));
        }
        Ok(())
    }

    fn ensure_distribution_id(&self, distribution_id: DistributionId) -> Result<(), DomainError> {
        if self.id != distribution_id {
            return Err(DomainError::invariant("distribution_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueDistribution) -> Result<Vec<DistributionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("distribution already exists"));
        }
        self.ensure_distribution_id(cmd.distribution_id)?;

        if cmd.lines.is_empty() {
            return Err(DomainError::invalid_input("no items requested"));
        }

        let mut seen = HashSet::new();
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::invalid_input(format!(
                    "quantity for item {} must be positive",
                    line.item_ref
                )));
            }
            if line.snapshot.kind() != line.kind {
                return Err(DomainError::invariant(format!(
                    "snapshot of item {} does not match its collection",
                    line.item_ref
                )));
            }
            if !seen.insert(line.item_ref) {
                return Err(DomainError::invalid_input(format!(
                    "item {} listed twice",
                    line.item_ref
                )));
            }
        }

        Ok(vec![DistributionEvent::Issued(DistributionIssued {
            distribution_id: cmd.distribution_id,
            distribution_no: cmd.distribution_no.clone(),
            armory_id: cmd.armory_id,
            officer_id: cmd.officer_id,
            lines: cmd.lines.clone(),
            squad_name: cmd.squad_name.clone(),
            remarks: cmd.remarks.clone(),
            renewal_due: cmd.renewal_due,
            issued_by: cmd.issued_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &RecordReturn) -> Result<Vec<DistributionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_distribution_id(cmd.distribution_id)?;

        let plan = self.plan_return(&cmd.lines)?;
        let lines: Vec<AppliedReturn> = plan.effective().cloned().collect();
        if lines.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![DistributionEvent::ReturnRecorded(ReturnRecorded {
            distribution_id: cmd.distribution_id,
            lines,
            returned_by: cmd.returned_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_renew(&self, cmd: &Renew) -> Result<Vec<DistributionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_distribution_id(cmd.distribution_id)?;

        Ok(vec![DistributionEvent::Renewed(Renewed {
            distribution_id: cmd.distribution_id,
            record: RenewalRecord {
                renewed_at: cmd.occurred_at,
                renewed_by: cmd.renewed_by,
                next_renewal_date: cmd.renewal.next_renewal_date,
                condition: cmd.renewal.condition,
                remarks: cmd.renewal.remarks.clone(),
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_patch(&self, cmd: &PatchDistribution) -> Result<Vec<DistributionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_distribution_id(cmd.distribution_id)?;

        if cmd.patch.is_empty() {
            return Err(DomainError::invalid_input("patch has no fields"));
        }

        if let Some(status) = cmd.patch.status {
            let derived = derive_status(self.totals(), false);
            let acceptable = match status {
                DistributionStatus::Overdue => derived.is_outstanding(),
                other => other == derived,
            };
            if !acceptable {
                return Err(DomainError::validation(format!(
                    "status is derived from quantities; cannot set '{status}' (derived: '{derived}')"
                )));
            }
        }

        Ok(vec![DistributionEvent::Patched(Patched {
            distribution_id: cmd.distribution_id,
            patch: cmd.patch.clone(),
            patched_by: cmd.patched_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_overdue(&self, cmd: &MarkOverdue) -> Result<Vec<DistributionEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_distribution_id(cmd.distribution_id)?;

        match self.renewal_due {
            Some(due) if due < cmd.as_of && !self.overdue && self.is_outstanding() => {
                Ok(vec![DistributionEvent::MarkedOverdue(MarkedOverdue {
                    distribution_id: cmd.distribution_id,
                    renewal_due: due,
                    occurred_at: cmd.as_of,
                })])
            }
            _ => Ok(vec![]),
        }
    }
}

/// Handle a command and apply the resulting events in one step.
pub fn execute(
    distribution: &mut Distribution,
    command: &DistributionCommand,
) -> Result<Vec<DistributionEvent>, DomainError> {
    let events = distribution.handle(command)?;
    for e in &events {
        distribution.apply(e);
    }
    Ok(events)
}
