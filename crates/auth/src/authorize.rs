use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use armsledger_core::{ArmoryId, DistributionId, OfficerId};

use crate::{Permission, Principal, Role};

/// Every engine entry point that goes through policy evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateArmory,
    AppendInventory,
    CorrectArmory,
    RemoveArmory,
    HandOverArmory,
    ReadArmory,
    IssueItems,
    ReturnItems,
    RenewDistribution,
    PatchDistribution,
    MarkOverdue,
    ReadDistribution,
    ReadPossessions,
    ReadAudit,
}

impl Operation {
    /// Permission a principal needs for this operation.
    pub fn required_permission(self) -> Permission {
        Permission::from_static(match self {
            Operation::CreateArmory => "armory.create",
            Operation::AppendInventory => "armory.inventory.append",
            Operation::CorrectArmory => "armory.correct",
            Operation::RemoveArmory => "armory.remove",
            Operation::HandOverArmory => "armory.handover",
            Operation::ReadArmory => "armory.read",
            Operation::IssueItems => "distribution.issue",
            Operation::ReturnItems => "distribution.return",
            Operation::RenewDistribution => "distribution.renew",
            Operation::PatchDistribution => "distribution.patch",
            Operation::MarkOverdue => "distribution.overdue",
            Operation::ReadDistribution => "distribution.read",
            Operation::ReadPossessions => "possessions.read",
            Operation::ReadAudit => "audit.read",
        })
    }
}

/// What an operation acts on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Resource {
    /// Collection-level operations (create, list, sweeps).
    Registry,
    Armory(ArmoryId),
    Distribution(DistributionId),
    Officer(OfficerId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Policy-evaluation seam consulted at every engine entry point.
pub trait AccessPolicy: Send + Sync {
    fn evaluate(
        &self,
        principal: &Principal,
        operation: Operation,
        resource: &Resource,
    ) -> Result<(), AuthzError>;
}

impl<P> AccessPolicy for std::sync::Arc<P>
where
    P: AccessPolicy + ?Sized,
{
    fn evaluate(
        &self,
        principal: &Principal,
        operation: Operation,
        resource: &Resource,
    ) -> Result<(), AuthzError> {
        (**self).evaluate(principal, operation, resource)
    }
}

/// Check a principal's explicit permissions against one requirement.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    let wildcard = principal.permissions.iter().any(Permission::is_wildcard);
    if wildcard || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Role-based policy: roles expand to permission sets, then `authorize` decides.
///
/// One resource-aware rule sits on top: an officer may always read their own
/// possessions.
#[derive(Debug, Clone)]
pub struct RolePolicy {
    grants: HashMap<Role, Vec<Permission>>,
}

impl RolePolicy {
    /// An empty policy (denies everything except self-reads).
    pub fn empty() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    /// Replace the permission set for a role.
    pub fn grant(mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.insert(role, permissions.into_iter().collect());
        self
    }

    /// Permissions granted by a role (empty for unknown roles).
    pub fn permissions_for(&self, role: &Role) -> &[Permission] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    fn effective(&self, principal: &Principal) -> Principal {
        let mut expanded = principal.clone();
        for role in &principal.roles {
            expanded.permissions.extend(self.permissions_for(role).iter().cloned());
        }
        expanded
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        let ops = |list: &[Operation]| -> Vec<Permission> {
            list.iter().map(|op| op.required_permission()).collect()
        };

        Self::empty()
            .grant(Role::ADMIN, [Permission::WILDCARD])
            .grant(
                Role::ARMORER,
                ops(&[
                    Operation::CreateArmory,
                    Operation::AppendInventory,
                    Operation::HandOverArmory,
                    Operation::ReadArmory,
                    Operation::IssueItems,
                    Operation::ReturnItems,
                    Operation::RenewDistribution,
                    Operation::MarkOverdue,
                    Operation::ReadDistribution,
                    Operation::ReadPossessions,
                    Operation::ReadAudit,
                ]),
            )
            .grant(
                Role::CUSTODIAN,
                ops(&[
                    Operation::ReadArmory,
                    Operation::IssueItems,
                    Operation::ReturnItems,
                    Operation::RenewDistribution,
                    Operation::ReadDistribution,
                    Operation::ReadPossessions,
                ]),
            )
            .grant(Role::OFFICER, Vec::new())
    }
}

impl AccessPolicy for RolePolicy {
    fn evaluate(
        &self,
        principal: &Principal,
        operation: Operation,
        resource: &Resource,
    ) -> Result<(), AuthzError> {
        if let (Operation::ReadPossessions, Resource::Officer(officer)) = (operation, resource) {
            if principal.officer_id == Some(*officer) {
                return Ok(());
            }
        }

        let required = operation.required_permission();
        let result = authorize(&self.effective(principal), &required);
        if result.is_err() {
            tracing::debug!(
                user_id = %principal.user_id,
                operation = ?operation,
                resource = ?resource,
                "policy denied operation"
            );
        }
        result
    }
}
