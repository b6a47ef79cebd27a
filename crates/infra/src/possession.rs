//! Possession View: what an officer currently holds.
//!
//! The view takes one snapshot of the officer's distributions; iterating it
//! is lazy and can be restarted without going back to the store.

use std::sync::Arc;

use tracing::instrument;

use armsledger_auth::{AccessPolicy, Operation, Principal, Resource};
use armsledger_core::OfficerId;
use armsledger_distribution::{Distribution, Possession, possessions};

use crate::error::EngineError;
use crate::store::DocumentStore;

/// Snapshot of one officer's distributions.
#[derive(Debug, Clone)]
pub struct Possessions {
    officer_id: OfficerId,
    distributions: Vec<Distribution>,
}

impl Possessions {
    pub fn officer_id(&self) -> OfficerId {
        self.officer_id
    }

    /// Outstanding items, oldest distribution first.
    pub fn iter(&self) -> impl Iterator<Item = Possession> + '_ {
        self.distributions.iter().flat_map(possessions)
    }

    /// Total units still out with the officer.
    pub fn outstanding_units(&self) -> u64 {
        self.iter().map(|p| u64::from(p.outstanding)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a Possessions {
    type Item = Possession;
    type IntoIter = Box<dyn Iterator<Item = Possession> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

pub struct PossessionView<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S> PossessionView<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    #[instrument(skip(self, principal), fields(user_id = %principal.user_id, officer_id = %officer_id), err)]
    pub fn current_possessions(
        &self,
        principal: &Principal,
        officer_id: OfficerId,
    ) -> Result<Possessions, EngineError> {
        self.policy
            .evaluate(principal, Operation::ReadPossessions, &Resource::Officer(officer_id))?;

        let mut distributions: Vec<Distribution> = self
            .store
            .distributions_for_officer(officer_id)?
            .into_iter()
            .filter(|d| d.is_outstanding())
            .collect();
        distributions.sort_by(|a, b| {
            a.date_issued()
                .cmp(&b.date_issued())
                .then_with(|| a.id_typed().cmp(&b.id_typed()))
        });

        tracing::debug!(officer_id = %officer_id, open = distributions.len(), "possessions loaded");
        Ok(Possessions {
            officer_id,
            distributions,
        })
    }
}
