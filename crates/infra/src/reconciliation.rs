//! Reconciliation Engine: moves units between an armory and an officer.
//!
//! Issue and return touch two documents. Both aggregates decide first (pure),
//! then both apply, then both are written in one transaction:
//!
//! ```text
//! policy → begin → load armory + distribution
//!        → armory.handle(Withdraw/Restock) + distribution.handle(Issue/Return)
//!        → apply both → put both (expected versions) → stage audit → commit → publish
//! ```
//!
//! A refusal from either side happens before anything is staged, so a failed
//! issue leaves no trace.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use armsledger_armory::{
    Armory, ArmoryCommand, ArmoryEvent, ItemKind, RestockItems, RestockLine, StockLine,
    WithdrawStock,
};
use armsledger_auth::{AccessPolicy, Operation, Principal, Resource};
use armsledger_core::{
    Aggregate, AggregateRoot, ArmoryId, DistributionId, ExpectedVersion, ItemId, OfficerId,
};
use armsledger_distribution::{
    AppliedReturn, Distribution, DistributionCommand, DistributionEvent, DistributionPatch,
    IssueDistribution, IssueLine, MarkOverdue, PatchDistribution, RecordReturn, RenewalRequest,
    Renew, ReturnLine,
};
use armsledger_events::EventBus;

use crate::audit::{ARMORY_AGGREGATE, DISTRIBUTION_AGGREGATE, commit_and_publish, stage_events};
use crate::config::LedgerConfig;
use crate::error::EngineError;
use crate::officers::OfficerDirectory;
use crate::query::{DistributionFilter, Page, Pagination, paginate};
use crate::store::{AuditRecord, DocumentStore, Transaction};

/// One requested line of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueItem {
    pub kind: ItemKind,
    pub item_ref: ItemId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub officer_id: OfficerId,
    pub armory_id: ArmoryId,
    pub items: Vec<IssueItem>,
    #[serde(default)]
    pub squad_name: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Result of a return: the updated distribution plus the clamp report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub distribution: Distribution,
    /// Per requested line: how much was asked for and how much was applied.
    pub lines: Vec<AppliedReturn>,
    /// True when any line was reduced to what was still outstanding.
    pub clamped: bool,
}

pub struct ReconciliationEngine<S, B> {
    store: S,
    bus: B,
    policy: Arc<dyn AccessPolicy>,
    officers: Arc<dyn OfficerDirectory>,
    config: LedgerConfig,
}

impl<S, B> ReconciliationEngine<S, B>
where
    S: DocumentStore,
    B: EventBus<AuditRecord>,
{
    pub fn new(
        store: S,
        bus: B,
        policy: Arc<dyn AccessPolicy>,
        officers: Arc<dyn OfficerDirectory>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            policy,
            officers,
            config,
        }
    }

    /// Withdraw stock from the armory and open a distribution for the officer.
    ///
    /// All-or-nothing: one line lacking stock refuses the whole request.
    #[instrument(
        skip(self, principal, request),
        fields(
            user_id = %principal.user_id,
            officer_id = %request.officer_id,
            armory_id = %request.armory_id,
            lines = request.items.len()
        ),
        err
    )]
    pub fn issue(&self, principal: &Principal, request: IssueRequest) -> Result<Distribution, EngineError> {
        let IssueRequest {
            officer_id,
            armory_id,
            items,
            squad_name,
            remarks,
        } = request;

        self.policy
            .evaluate(principal, Operation::IssueItems, &Resource::Armory(armory_id))?;

        if items.is_empty() {
            return Err(EngineError::invalid_input("no items requested"));
        }

        let officer = self
            .officers
            .lookup(officer_id)
            .ok_or_else(|| EngineError::not_found(format!("officer {officer_id}")))?;
        if !officer.is_eligible() {
            return Err(EngineError::invalid_input(format!(
                "officer {officer_id} is not eligible for issue ({:?})",
                officer.status
            )));
        }

        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut armory = tx
            .load_armory(armory_id)?
            .ok_or_else(|| EngineError::not_found(format!("armory {armory_id}")))?;
        let armory_version = armory.version();

        let withdraw = ArmoryCommand::WithdrawStock(WithdrawStock {
            armory_id,
            lines: items
                .iter()
                .map(|i| StockLine {
                    kind: i.kind,
                    item_id: i.item_ref,
                    quantity: i.quantity,
                })
                .collect(),
            occurred_at: now,
        });
        let armory_events = armory.handle(&withdraw)?;

        let lines = issue_lines(&armory, &armory_events)?;
        let distribution_id = DistributionId::new();
        let mut distribution = Distribution::empty(distribution_id);
        let distribution_events = distribution.handle(&DistributionCommand::Issue(IssueDistribution {
            distribution_id,
            distribution_no: Distribution::number_for(distribution_id, now),
            armory_id,
            officer_id,
            lines,
            squad_name,
            remarks,
            renewal_due: Some(now + self.config.renewal_period()),
            issued_by: principal.user_id,
            occurred_at: now,
        }))?;

        for e in &armory_events {
            armory.apply(e);
        }
        for e in &distribution_events {
            distribution.apply(e);
        }

        tx.put_armory(armory, ExpectedVersion::Exact(armory_version))?;
        tx.put_distribution(distribution.clone(), ExpectedVersion::NoDocument)?;
        stage_events(
            &mut tx,
            *armory_id.as_uuid(),
            ARMORY_AGGREGATE,
            armory_version,
            principal.user_id,
            &armory_events,
        )?;
        stage_events(
            &mut tx,
            *distribution_id.as_uuid(),
            DISTRIBUTION_AGGREGATE,
            0,
            principal.user_id,
            &distribution_events,
        )?;
        commit_and_publish(tx, &self.bus)?;

        tracing::info!(
            distribution_id = %distribution_id,
            distribution_no = distribution.distribution_no(),
            units = distribution.totals().issued,
            "items issued"
        );
        Ok(distribution)
    }

    /// Record returns against a distribution and put the units back in stock.
    ///
    /// Each line is clamped to what is still outstanding; a batch that moves
    /// nothing (including an empty one) changes nothing.
    #[instrument(
        skip(self, principal, returns),
        fields(user_id = %principal.user_id, distribution_id = %distribution_id, lines = returns.len()),
        err
    )]
    pub fn return_items(
        &self,
        principal: &Principal,
        distribution_id: DistributionId,
        returns: Vec<ReturnLine>,
    ) -> Result<ReturnOutcome, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReturnItems, &Resource::Distribution(distribution_id))?;

        let now = Utc::now();
        let mut tx = self.store.begin()?;
        let mut distribution = tx
            .load_distribution(distribution_id)?
            .ok_or_else(|| EngineError::not_found(format!("distribution {distribution_id}")))?;
        let distribution_version = distribution.version();

        let plan = distribution.plan_return(&returns)?;
        let clamped = plan.clamped();
        if clamped {
            tracing::warn!(
                distribution_id = %distribution_id,
                requested = returns.iter().map(|r| u64::from(r.quantity)).sum::<u64>(),
                applied = plan.applied_total(),
                "return clamped to outstanding quantity"
            );
        }

        if plan.applied_total() == 0 {
            tx.abort();
            return Ok(ReturnOutcome {
                distribution,
                lines: plan.lines,
                clamped,
            });
        }

        let distribution_events = distribution.handle(&DistributionCommand::RecordReturn(RecordReturn {
            distribution_id,
            lines: returns,
            returned_by: principal.user_id,
            occurred_at: now,
        }))?;

        let armory_id = distribution.armory_id();
        let restock = tx.load_armory(armory_id)?.map(|armory| {
            let lines = plan
                .effective()
                .map(|l| RestockLine {
                    kind: l.kind,
                    item_id: l.item_ref,
                    quantity: l.applied,
                    condition: l.condition,
                })
                .collect();
            (armory, lines)
        });

        match restock {
            Some((mut armory, lines)) => {
                let armory_version = armory.version();
                let armory_events = armory.handle(&ArmoryCommand::RestockItems(RestockItems {
                    armory_id,
                    lines,
                    occurred_at: now,
                }))?;
                for e in &armory_events {
                    armory.apply(e);
                }
                tx.put_armory(armory, ExpectedVersion::Exact(armory_version))?;
                stage_events(
                    &mut tx,
                    *armory_id.as_uuid(),
                    ARMORY_AGGREGATE,
                    armory_version,
                    principal.user_id,
                    &armory_events,
                )?;
            }
            None => {
                // Only reachable when removal with open distributions is allowed.
                tracing::warn!(
                    distribution_id = %distribution_id,
                    armory_id = %armory_id,
                    "armory no longer exists; restock skipped"
                );
            }
        }

        for e in &distribution_events {
            distribution.apply(e);
        }
        tx.put_distribution(distribution.clone(), ExpectedVersion::Exact(distribution_version))?;
        stage_events(
            &mut tx,
            *distribution_id.as_uuid(),
            DISTRIBUTION_AGGREGATE,
            distribution_version,
            principal.user_id,
            &distribution_events,
        )?;
        commit_and_publish(tx, &self.bus)?;

        tracing::info!(
            distribution_id = %distribution_id,
            units = plan.applied_total(),
            status = %distribution.status(),
            "items returned"
        );
        Ok(ReturnOutcome {
            distribution,
            lines: plan.lines,
            clamped,
        })
    }

    /// Extend a distribution. Never touches the armory.
    #[instrument(skip(self, principal, renewal), fields(user_id = %principal.user_id, distribution_id = %distribution_id), err)]
    pub fn renew(
        &self,
        principal: &Principal,
        distribution_id: DistributionId,
        renewal: RenewalRequest,
    ) -> Result<Distribution, EngineError> {
        self.policy.evaluate(
            principal,
            Operation::RenewDistribution,
            &Resource::Distribution(distribution_id),
        )?;

        let distribution = self.mutate(
            principal,
            distribution_id,
            DistributionCommand::Renew(Renew {
                distribution_id,
                renewal,
                renewed_by: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(
            distribution_id = %distribution_id,
            renewal_due = ?distribution.renewal_due(),
            "distribution renewed"
        );
        Ok(distribution)
    }

    /// Administrative edit of remarks, squad, renewal status and the overdue flag.
    #[instrument(skip(self, principal, patch), fields(user_id = %principal.user_id, distribution_id = %distribution_id), err)]
    pub fn patch(
        &self,
        principal: &Principal,
        distribution_id: DistributionId,
        patch: DistributionPatch,
    ) -> Result<Distribution, EngineError> {
        self.policy.evaluate(
            principal,
            Operation::PatchDistribution,
            &Resource::Distribution(distribution_id),
        )?;

        let distribution = self.mutate(
            principal,
            distribution_id,
            DistributionCommand::Patch(PatchDistribution {
                distribution_id,
                patch,
                patched_by: principal.user_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(distribution_id = %distribution_id, status = %distribution.status(), "distribution patched");
        Ok(distribution)
    }

    /// Flag every outstanding distribution whose renewal is past due.
    ///
    /// Each distribution is its own transaction; one that loses a race is
    /// skipped and picked up by the next sweep.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id), err)]
    pub fn mark_overdue(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<Vec<DistributionId>, EngineError> {
        self.policy
            .evaluate(principal, Operation::MarkOverdue, &Resource::Registry)?;

        let mut candidates: Vec<DistributionId> = self
            .store
            .distributions()?
            .into_iter()
            .filter(|d| d.is_outstanding() && d.renewal_due().is_some_and(|due| due < now))
            .map(|d| d.id_typed())
            .collect();
        candidates.sort();

        let mut touched = Vec::new();
        for distribution_id in candidates {
            let command = DistributionCommand::MarkOverdue(MarkOverdue {
                distribution_id,
                as_of: now,
            });
            match self.mutate_with_events(principal, distribution_id, command) {
                Ok((_, events)) if !events.is_empty() => touched.push(distribution_id),
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    tracing::warn!(distribution_id = %distribution_id, error = %err, "overdue flag skipped");
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(flagged = touched.len(), "overdue sweep finished");
        Ok(touched)
    }

    pub fn get(&self, principal: &Principal, distribution_id: DistributionId) -> Result<Distribution, EngineError> {
        self.policy.evaluate(
            principal,
            Operation::ReadDistribution,
            &Resource::Distribution(distribution_id),
        )?;

        self.store
            .distribution(distribution_id)?
            .ok_or_else(|| EngineError::not_found(format!("distribution {distribution_id}")))
    }

    /// Distributions matching `filter`, newest first.
    pub fn list(
        &self,
        principal: &Principal,
        filter: &DistributionFilter,
        pagination: Pagination,
    ) -> Result<Page<Distribution>, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReadDistribution, &Resource::Registry)?;

        let mut matching: Vec<Distribution> = self
            .store
            .distributions()?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect();
        matching.sort_by(|a, b| {
            b.date_issued()
                .cmp(&a.date_issued())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });

        Ok(paginate(matching, pagination))
    }

    fn mutate(
        &self,
        principal: &Principal,
        distribution_id: DistributionId,
        command: DistributionCommand,
    ) -> Result<Distribution, EngineError> {
        self.mutate_with_events(principal, distribution_id, command)
            .map(|(distribution, _)| distribution)
    }

    /// Single-document pipeline for commands that never touch the armory.
    fn mutate_with_events(
        &self,
        principal: &Principal,
        distribution_id: DistributionId,
        command: DistributionCommand,
    ) -> Result<(Distribution, Vec<DistributionEvent>), EngineError> {
        let mut tx = self.store.begin()?;
        let mut distribution = tx
            .load_distribution(distribution_id)?
            .ok_or_else(|| EngineError::not_found(format!("distribution {distribution_id}")))?;
        let version_before = distribution.version();

        let events = distribution.handle(&command)?;
        if events.is_empty() {
            tx.abort();
            return Ok((distribution, events));
        }
        for e in &events {
            distribution.apply(e);
        }

        tx.put_distribution(distribution.clone(), ExpectedVersion::Exact(version_before))?;
        stage_events(
            &mut tx,
            *distribution_id.as_uuid(),
            DISTRIBUTION_AGGREGATE,
            version_before,
            principal.user_id,
            &events,
        )?;
        commit_and_publish(tx, &self.bus)?;

        Ok((distribution, events))
    }
}

/// Distribution lines for an accepted withdrawal, with snapshots copied out
/// of the armory entries as they stand before the withdrawal.
fn issue_lines(armory: &Armory, events: &[ArmoryEvent]) -> Result<Vec<IssueLine>, EngineError> {
    let mut lines = Vec::new();
    for event in events {
        let ArmoryEvent::StockWithdrawn(withdrawn) = event else {
            continue;
        };
        for line in &withdrawn.lines {
            let entry = armory.entry_of(line.kind, line.item_id).ok_or_else(|| {
                EngineError::Invariant(format!("withdrawn item {} missing from armory", line.item_id))
            })?;
            lines.push(IssueLine {
                kind: line.kind,
                item_ref: line.item_id,
                snapshot: entry.snapshot(),
                quantity: line.quantity,
            });
        }
    }
    Ok(lines)
}
