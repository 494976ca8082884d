//! Company registry
//!
//! Keeps the company ↔ treasury mapping bijective: every treasury is bound to
//! at most one company and every company to exactly one treasury. Companies
//! are never removed, only deactivated.

use crate::types::{Company, WalletKind};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spend_policy::{AccountId, Amount, CompanyId};
use std::collections::HashMap;

/// Company table plus reverse treasury index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyRegistry {
    companies: HashMap<CompanyId, Company>,
    by_treasury: HashMap<AccountId, CompanyId>,
}

impl CompanyRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active company
    pub fn register(
        &mut self,
        company_id: CompanyId,
        treasury: AccountId,
        wallet_kind: WalletKind,
        allowance_module: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<&Company> {
        if treasury.is_null() {
            return Err(Error::InvalidTreasury);
        }
        if self.companies.contains_key(&company_id) {
            return Err(Error::AlreadyRegistered(company_id));
        }
        self.ensure_treasury_free(&treasury, &company_id)?;

        let company = Company {
            company_id: company_id.clone(),
            treasury: treasury.clone(),
            wallet_kind,
            allowance_module: normalize_module(wallet_kind, allowance_module),
            active: true,
            registered_at: now,
            updated_at: now,
            total_reimbursed: Amount::ZERO,
            reimbursement_count: 0,
        };

        self.by_treasury.insert(treasury, company_id.clone());
        Ok(self.companies.entry(company_id).or_insert(company))
    }

    /// Set the active flag; returns true if it changed
    pub fn set_active(
        &mut self,
        company_id: &CompanyId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let company = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
        if company.active == active {
            return Ok(false);
        }
        company.active = active;
        company.updated_at = now;
        Ok(true)
    }

    /// Move a company to a new treasury; returns the previous treasury
    ///
    /// Totals and history are preserved.
    pub fn update_treasury(
        &mut self,
        company_id: &CompanyId,
        new_treasury: AccountId,
        wallet_kind: WalletKind,
        allowance_module: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<AccountId> {
        if new_treasury.is_null() {
            return Err(Error::InvalidTreasury);
        }
        if !self.companies.contains_key(company_id) {
            return Err(Error::NotRegistered(company_id.clone()));
        }
        self.ensure_treasury_free(&new_treasury, company_id)?;

        let company = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
        let old_treasury = std::mem::replace(&mut company.treasury, new_treasury.clone());
        company.wallet_kind = wallet_kind;
        company.allowance_module = normalize_module(wallet_kind, allowance_module);
        company.updated_at = now;

        self.by_treasury.remove(&old_treasury);
        self.by_treasury.insert(new_treasury, company_id.clone());
        Ok(old_treasury)
    }

    /// Add an executed reimbursement to the company totals
    ///
    /// Runs after funds moved, so totals saturate instead of failing.
    pub fn record_reimbursement(&mut self, company_id: &CompanyId, amount: Amount) -> Result<()> {
        let company = self
            .companies
            .get_mut(company_id)
            .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
        company.total_reimbursed = company.total_reimbursed.saturating_add(amount);
        company.reimbursement_count = company.reimbursement_count.saturating_add(1);
        Ok(())
    }

    /// Look up a company
    pub fn get(&self, company_id: &CompanyId) -> Option<&Company> {
        self.companies.get(company_id)
    }

    /// Company bound to a treasury
    pub fn company_for_treasury(&self, treasury: &AccountId) -> Option<&CompanyId> {
        self.by_treasury.get(treasury)
    }

    /// Number of registered companies
    pub fn len(&self) -> usize {
        self.companies.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    fn ensure_treasury_free(&self, treasury: &AccountId, company_id: &CompanyId) -> Result<()> {
        match self.by_treasury.get(treasury) {
            Some(owner) if owner != company_id => Err(Error::TreasuryInUse {
                treasury: treasury.clone(),
                company_id: owner.clone(),
            }),
            _ => Ok(()),
        }
    }
}

fn normalize_module(kind: WalletKind, module: Option<AccountId>) -> Option<AccountId> {
    if kind.uses_allowance_module() {
        module.filter(|m| !m.is_null())
    } else {
        None
    }
}
