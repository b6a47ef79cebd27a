//! Distribution ledger domain.
//!
//! A distribution records one issuance from an armory to an officer and
//! tracks it through returns and renewals. Status is derived, never set.

pub mod distribution;
pub mod possession;
pub mod status;

pub use distribution::{
    AppliedReturn, Distribution, DistributionCommand, DistributionEvent, DistributionIssued,
    DistributionPatch, IssueDistribution, IssueLine, IssuedItem, MarkOverdue, MarkedOverdue,
    PatchDistribution, Patched, RecordReturn, RenewalRecord, RenewalRequest, RenewalStatus, Renew,
    Renewed, ReturnLine, ReturnPlan, ReturnRecorded, execute,
};
pub use possession::{Possession, possessions};
pub use status::{DistributionStatus, Totals, derive_status};
