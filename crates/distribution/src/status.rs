//! Status Deriver: a distribution's lifecycle status as a pure function of its totals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Issued,
    PartialReturn,
    Returned,
    Overdue,
}

impl DistributionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DistributionStatus::Issued => "issued",
            DistributionStatus::PartialReturn => "partial_return",
            DistributionStatus::Returned => "returned",
            DistributionStatus::Overdue => "overdue",
        }
    }

    /// Whether units are still out with the officer.
    pub fn is_outstanding(self) -> bool {
        !matches!(self, DistributionStatus::Returned)
    }
}

impl core::fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issued/returned unit counts summed over every issued sub-entry.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub issued: u64,
    pub returned: u64,
}

impl Totals {
    pub fn outstanding(&self) -> u64 {
        self.issued.saturating_sub(self.returned)
    }
}

/// Compute the status for the given totals.
///
/// `overdue` is the flag raised by the overdue sweep or an administrative
/// patch; it only shows while something is still outstanding.
pub fn derive_status(totals: Totals, overdue: bool) -> DistributionStatus {
    if totals.issued > 0 && totals.returned >= totals.issued {
        DistributionStatus::Returned
    } else if overdue {
        DistributionStatus::Overdue
    } else if totals.returned == 0 {
        DistributionStatus::Issued
    } else {
        DistributionStatus::PartialReturn
    }
}
