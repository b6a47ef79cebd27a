//! What an officer is holding right now, read straight off the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use armsledger_armory::{ItemKind, ItemSnapshot};
use armsledger_core::{ArmoryId, DistributionId, ItemId, OfficerId};

use crate::distribution::Distribution;
use crate::status::DistributionStatus;

/// One outstanding sub-entry, flattened with its distribution's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Possession {
    pub distribution_id: DistributionId,
    pub distribution_no: String,
    pub armory_id: ArmoryId,
    pub officer_id: OfficerId,
    pub status: DistributionStatus,
    pub kind: ItemKind,
    pub item_ref: ItemId,
    pub item_snapshot: ItemSnapshot,
    pub quantity: u32,
    pub returned_quantity: u32,
    pub outstanding: u32,
    pub date_issued: Option<DateTime<Utc>>,
    pub renewal_due: Option<DateTime<Utc>>,
}

/// Outstanding sub-entries of one distribution (empty once fully returned).
pub fn possessions(distribution: &Distribution) -> impl Iterator<Item = Possession> + '_ {
    let open = distribution.status().is_outstanding();
    distribution
        .outstanding_items()
        .filter(move |_| open)
        .map(move |(kind, item)| Possession {
            distribution_id: distribution.id_typed(),
            distribution_no: distribution.distribution_no().to_string(),
            armory_id: distribution.armory_id(),
            officer_id: distribution.officer_id(),
            status: distribution.status(),
            kind,
            item_ref: item.item_ref,
            item_snapshot: item.item_snapshot.clone(),
            quantity: item.quantity,
            returned_quantity: item.returned_quantity,
            outstanding: item.outstanding(),
            date_issued: distribution.date_issued(),
            renewal_due: distribution.renewal_due(),
        })
}
