//! `armsledger-auth`: the single policy-evaluation point for engine operations.
//!
//! Authentication happens upstream; this crate only answers
//! `(actor, operation, resource) → allow/deny`. Decoupled from transport and storage.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AccessPolicy, AuthzError, Operation, Resource, RolePolicy, authorize};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::Role;
