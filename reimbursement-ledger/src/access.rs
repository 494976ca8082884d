//! Role-based access gate
//!
//! Roles are independent; holding `Admin` does not imply `Operator` or
//! `Pauser`. Only `Admin` can change grants.

use crate::{Error, Result};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use spend_policy::AccountId;
use std::fmt;

/// Named capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Manages companies, limits, fees, grants; unpauses
    Admin,
    /// Executes reimbursements
    Operator,
    /// May pause, cannot unpause
    Pauser,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "Admin"),
            Role::Operator => write!(f, "Operator"),
            Role::Pauser => write!(f, "Pauser"),
        }
    }
}

/// Set of (principal, role) grants
#[derive(Debug, Default)]
pub struct AccessGate {
    grants: DashSet<(AccountId, Role)>,
}

impl AccessGate {
    /// Gate with a single bootstrap admin
    pub fn with_admin(admin: AccountId) -> Self {
        let gate = Self::default();
        gate.grants.insert((admin, Role::Admin));
        gate
    }

    /// Rebuild from exported grants
    pub fn from_grants(grants: impl IntoIterator<Item = (AccountId, Role)>) -> Self {
        Self {
            grants: grants.into_iter().collect(),
        }
    }

    /// Replace every grant (snapshot restore)
    pub fn reset(&self, grants: impl IntoIterator<Item = (AccountId, Role)>) {
        self.grants.clear();
        for grant in grants {
            self.grants.insert(grant);
        }
    }

    /// Check membership
    pub fn has_role(&self, principal: &AccountId, role: Role) -> bool {
        self.grants.contains(&(principal.clone(), role))
    }

    /// Fail with `Unauthorized` unless `principal` holds `role`
    pub fn require(&self, principal: &AccountId, role: Role) -> Result<()> {
        if self.has_role(principal, role) {
            Ok(())
        } else {
            tracing::warn!(%principal, %role, "access denied");
            Err(Error::Unauthorized {
                principal: principal.clone(),
                role,
            })
        }
    }

    /// Grant `role` to `principal`; returns false if it was already held
    pub fn grant(&self, caller: &AccountId, role: Role, principal: &AccountId) -> Result<bool> {
        self.require(caller, Role::Admin)?;
        Ok(self.grants.insert((principal.clone(), role)))
    }

    /// Revoke `role` from `principal`; returns false if it was not held
    pub fn revoke(&self, caller: &AccountId, role: Role, principal: &AccountId) -> Result<bool> {
        self.require(caller, Role::Admin)?;
        Ok(self.grants.remove(&(principal.clone(), role)).is_some())
    }

    /// Principals holding `role`, sorted
    pub fn members(&self, role: Role) -> Vec<AccountId> {
        let mut members: Vec<AccountId> = self
            .grants
            .iter()
            .filter(|g| g.key().1 == role)
            .map(|g| g.key().0.clone())
            .collect();
        members.sort();
        members
    }

    /// All grants, sorted
    pub fn export(&self) -> Vec<(AccountId, Role)> {
        let mut grants: Vec<(AccountId, Role)> = self.grants.iter().map(|g| g.key().clone()).collect();
        grants.sort();
        grants
    }
}
