use serde::{Deserialize, Serialize};

use armsledger_core::{OfficerId, UserId};

use crate::{Permission, Role};

/// An authenticated actor as handed to the engine by the request layer.
///
/// `user_id` is what gets stamped into `issuedBy` / `returnedBy` / `renewedBy`.
/// `officer_id` links the account to an officer record, which lets an officer
/// read their own possessions without a broader grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub roles: Vec<Role>,
    /// Explicit grants on top of whatever the roles imply.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub officer_id: Option<OfficerId>,
}

impl Principal {
    pub fn new(user_id: UserId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            user_id,
            roles: roles.into_iter().collect(),
            permissions: Vec::new(),
            officer_id: None,
        }
    }

    pub fn with_officer(mut self, officer_id: OfficerId) -> Self {
        self.officer_id = Some(officer_id);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}
