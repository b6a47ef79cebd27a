//! Listing queries over unsynchronised snapshots.
//!
//! Pages are 1-based. Filters are conjunctive; `search` is a case-insensitive
//! substring match over the human-facing fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use armsledger_armory::{Armory, ArmoryStatus};
use armsledger_core::{ArmoryId, OfficerId};
use armsledger_distribution::{Distribution, DistributionStatus};

use crate::config::LedgerConfig;
use crate::store::AuditRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Fill in defaults and cap the page size from config.
    pub fn new(page: Option<u32>, page_size: Option<u32>, config: &LedgerConfig) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(config.default_page_size)
                .clamp(1, config.max_page_size),
        }
    }

    fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None, &LedgerConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Cut one page out of an already filtered and sorted list.
pub fn paginate<T>(items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len();
    let offset = pagination.offset();
    let items: Vec<T> = items
        .into_iter()
        .skip(offset)
        .take(pagination.page_size as usize)
        .collect();
    let has_more = offset.saturating_add(items.len()) < total;

    Page {
        items,
        total: total as u64,
        pagination,
        has_more,
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn normalized(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryFilter {
    pub unit: Option<String>,
    pub status: Option<ArmoryStatus>,
    pub search: Option<String>,
}

impl ArmoryFilter {
    pub fn matches(&self, armory: &Armory) -> bool {
        let profile = armory.profile();
        if let Some(unit) = &self.unit {
            if !profile.unit.trim().eq_ignore_ascii_case(unit.trim()) {
                return false;
            }
        }
        if self.status.is_some_and(|s| s != profile.status) {
            return false;
        }
        match normalized(&self.search) {
            Some(needle) => [
                armory.reference_id(),
                profile.name.as_str(),
                profile.code.as_str(),
                profile.location.as_str(),
                profile.unit.as_str(),
            ]
            .iter()
            .any(|field| contains_ci(field, &needle)),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionFilter {
    pub officer_id: Option<OfficerId>,
    pub armory_id: Option<ArmoryId>,
    pub status: Option<DistributionStatus>,
    pub search: Option<String>,
}

impl DistributionFilter {
    pub fn matches(&self, distribution: &Distribution) -> bool {
        if self.officer_id.is_some_and(|o| o != distribution.officer_id()) {
            return false;
        }
        if self.armory_id.is_some_and(|a| a != distribution.armory_id()) {
            return false;
        }
        if self.status.is_some_and(|s| s != distribution.status()) {
            return false;
        }
        match normalized(&self.search) {
            Some(needle) => {
                contains_ci(distribution.distribution_no(), &needle)
                    || distribution.squad_name().is_some_and(|s| contains_ci(s, &needle))
                    || distribution.remarks().is_some_and(|r| contains_ci(r, &needle))
                    || distribution
                        .all_issued()
                        .any(|(_, i)| contains_ci(&i.item_snapshot.details.search_text(), &needle))
            }
            None => true,
        }
    }
}

/// Audit journal filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub aggregate_id: Option<Uuid>,
    /// `"armory"` or `"distribution"`.
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.aggregate_id.is_none_or(|id| id == record.aggregate_id())
            && self
                .aggregate_type
                .as_deref()
                .is_none_or(|t| t == record.aggregate_type())
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| t == record.event_type())
            && self.occurred_after.is_none_or(|t| record.occurred_at() > t)
            && self.occurred_before.is_none_or(|t| record.occurred_at() < t)
    }
}
