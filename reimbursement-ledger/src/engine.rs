//! Reimbursement engine
//!
//! Orchestrates access checks, registry lookups, limit reservation, fee
//! split, the external transfer and the resulting record and audit event.
//!
//! # Concurrency
//!
//! Every mutating call holds the writer gate for its whole duration,
//! including the provider await inside [`ReimbursementEngine::execute`], so
//! check-and-update sequences never interleave. State lives behind a
//! read/write lock and each phase of a mutation is applied inside one write
//! critical section. Queries never take the writer gate; they observe the
//! state before or after a phase, never a half-applied one.

use crate::{
    access::{AccessGate, Role},
    config::Config,
    error::{Error, Result},
    events::{AuditEnvelope, AuditEvent},
    metrics::Metrics,
    storage::{self, LedgerStore},
    transfer::{TransferError, TransferLeg, TransferProvider},
    types::{Company, Fingerprint, RecordId, RecordStatus, ReimbursementRecord, WalletKind},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use spend_policy::{
    AccountId, Amount, Clock, CompanyId, DefaultLimits, FeeSchedule, RecipientLimits,
    Reservation, SystemClock,
};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, MutexGuard};

/// Non-custodial reimbursement engine
pub struct ReimbursementEngine {
    engine_account: AccountId,
    access: AccessGate,
    state: RwLock<LedgerStore>,
    writer: Mutex<()>,
    provider: Arc<dyn TransferProvider>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<AuditEnvelope>,
    metrics: Metrics,
    transfer_timeout: Duration,
    retain: usize,
    snapshot_path: Option<PathBuf>,
}

/// Outcome of the pre-transfer commit phase
struct Prepared {
    record_id: RecordId,
    treasury: AccountId,
    reservation: Reservation,
    fee: Amount,
    legs: Vec<TransferLeg>,
}

/// A `Pending` record awaiting its transfer outcome
///
/// Owns the writer gate. Dropping it unsettled (the execute future was
/// cancelled mid-transfer) settles the record as `Failed` before the gate
/// is released.
struct PendingSettlement<'a> {
    engine: &'a ReimbursementEngine,
    caller: &'a AccountId,
    record_id: RecordId,
    prepared: Option<Prepared>,
    _writer: MutexGuard<'a, ()>,
}

impl PendingSettlement<'_> {
    fn settle(mut self, outcome: std::result::Result<(), TransferError>) -> RecordId {
        if let Some(prepared) = self.prepared.take() {
            match outcome {
                Ok(()) => self.engine.settle_executed(self.caller, prepared),
                Err(err) => self.engine.settle_failed(self.caller, prepared, err),
            }
            self.engine.persist();
        }
        self.record_id
    }
}

impl Drop for PendingSettlement<'_> {
    fn drop(&mut self) {
        if let Some(prepared) = self.prepared.take() {
            tracing::warn!(record_id = self.record_id, "execution cancelled mid-transfer");
            self.engine
                .settle_failed(self.caller, prepared, TransferError::Cancelled);
            self.engine.persist();
        }
    }
}

impl ReimbursementEngine {
    /// Create an engine with an empty ledger
    pub fn new(config: &Config, provider: Arc<dyn TransferProvider>) -> Result<Self> {
        config.validate()?;

        let access = AccessGate::with_admin(config.bootstrap_admin());
        let mut store = LedgerStore::new(config.default_limits()?, config.fee_schedule()?);
        store.grants = access.export();

        let (events, _) = broadcast::channel(config.events.channel_capacity);
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            engine_account = %config.engine_account,
            "reimbursement engine created"
        );

        Ok(Self {
            engine_account: config.engine_account(),
            access,
            state: RwLock::new(store),
            writer: Mutex::new(()),
            provider,
            clock: Arc::new(SystemClock),
            events,
            metrics,
            transfer_timeout: Duration::from_millis(config.transfer_timeout_ms),
            retain: config.events.retain,
            snapshot_path: None,
        })
    }

    /// Write the ledger to `path` after every committed change
    ///
    /// Each successful admin call and each settled execution replaces the
    /// snapshot, so processed receipts survive a crash.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // Execution

    /// Execute one approved reimbursement
    ///
    /// Rejections return an error and leave no trace. Once capacity is
    /// reserved the call always returns the record id; a transfer failure
    /// is reported through the record's `Failed` status and a
    /// `ReimbursementFailed` event.
    #[tracing::instrument(
        skip(self, receipt_fingerprint, audit_proof),
        fields(receipt = %receipt_fingerprint, record_id = tracing::field::Empty)
    )]
    pub async fn execute(
        &self,
        caller: &AccountId,
        company_id: &CompanyId,
        recipient: &AccountId,
        amount: Amount,
        receipt_fingerprint: Fingerprint,
        audit_proof: Fingerprint,
    ) -> Result<RecordId> {
        let writer = self.writer.lock().await;
        let result = self
            .execute_locked(
                writer,
                caller,
                company_id,
                recipient,
                amount,
                receipt_fingerprint,
                audit_proof,
            )
            .await;
        if let Ok(record_id) = &result {
            tracing::Span::current().record("record_id", record_id);
        }
        self.observe(result)
    }

    async fn execute_locked<'a>(
        &'a self,
        writer: MutexGuard<'a, ()>,
        caller: &'a AccountId,
        company_id: &CompanyId,
        recipient: &AccountId,
        amount: Amount,
        receipt_fingerprint: Fingerprint,
        audit_proof: Fingerprint,
    ) -> Result<RecordId> {
        self.access.require(caller, Role::Operator)?;

        let treasury = {
            let state = self.state.read();
            state.pause.ensure_running()?;
            if recipient.is_null() {
                return Err(Error::InvalidRecipient);
            }
            if amount.is_zero() {
                return Err(Error::InvalidAmount("amount must be positive".to_string()));
            }
            if state.replay.is_processed(&receipt_fingerprint) {
                return Err(Error::DuplicateReceipt(receipt_fingerprint));
            }
            let company = state
                .registry
                .get(company_id)
                .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
            if !company.active {
                return Err(Error::Inactive(company_id.clone()));
            }
            company.treasury.clone()
        };

        let granted = self
            .bounded(self.provider.allowance(&treasury, &self.engine_account))
            .await
            .map_err(|e| Error::TransferFailed(e.to_string()))?;
        if granted < amount {
            return Err(Error::InsufficientAllowance {
                requested: amount,
                granted,
            });
        }

        let prepared = self.prepare(
            company_id,
            recipient,
            amount,
            receipt_fingerprint,
            audit_proof,
            treasury,
        )?;

        let treasury = prepared.treasury.clone();
        let legs = prepared.legs.clone();
        let pending = PendingSettlement {
            engine: self,
            caller,
            record_id: prepared.record_id,
            prepared: Some(prepared),
            _writer: writer,
        };

        let started = Instant::now();
        let outcome = self
            .bounded(self.provider.move_funds_batch(&treasury, &legs))
            .await;
        self.metrics
            .record_transfer_duration(started.elapsed().as_secs_f64());

        Ok(pending.settle(outcome))
    }

    /// Mark, reserve and write the `Pending` record in one critical section
    fn prepare(
        &self,
        company_id: &CompanyId,
        recipient: &AccountId,
        amount: Amount,
        receipt_fingerprint: Fingerprint,
        audit_proof: Fingerprint,
        treasury: AccountId,
    ) -> Result<Prepared> {
        let now = self.clock.now();
        let mut state = self.state.write();

        if !state.replay.try_mark(receipt_fingerprint) {
            return Err(Error::DuplicateReceipt(receipt_fingerprint));
        }
        let reservation = match state.limits.reserve(company_id, recipient, amount, now) {
            Ok(reservation) => reservation,
            Err(err) => {
                state.replay.clear(&receipt_fingerprint);
                return Err(err.into());
            }
        };

        let record_id = state.allocate_record_id();
        let (fee, net_amount) = state.fees.split(amount);
        let mut legs = vec![TransferLeg {
            to: recipient.clone(),
            amount: net_amount,
        }];
        if let Some(fee_recipient) = state.fees.fee_recipient().filter(|_| !fee.is_zero()) {
            legs.push(TransferLeg {
                to: fee_recipient.clone(),
                amount: fee,
            });
        }

        state.records.insert(
            record_id,
            ReimbursementRecord {
                record_id,
                company_id: company_id.clone(),
                recipient: recipient.clone(),
                amount,
                fee,
                net_amount,
                receipt_fingerprint,
                audit_proof,
                created_at: now,
                settled_at: None,
                status: RecordStatus::Pending,
                failure_reason: None,
            },
        );

        tracing::debug!(record_id, %fee, %net_amount, legs = legs.len(), "record pending");

        Ok(Prepared {
            record_id,
            treasury,
            reservation,
            fee,
            legs,
        })
    }

    fn settle_executed(&self, caller: &AccountId, prepared: Prepared) {
        let now = self.clock.now();
        let envelope = {
            let mut state = self.state.write();
            let Some(record) = state.records.get_mut(&prepared.record_id) else {
                tracing::error!(record_id = prepared.record_id, "pending record vanished");
                return;
            };
            record.status = RecordStatus::Executed;
            record.settled_at = Some(now);
            let event = AuditEvent::ReimbursementExecuted {
                record_id: record.record_id,
                company_id: record.company_id.clone(),
                recipient: record.recipient.clone(),
                amount: record.amount,
                fee: record.fee,
                net_amount: record.net_amount,
                receipt_fingerprint: record.receipt_fingerprint,
                audit_proof: record.audit_proof,
            };
            let company_id = record.company_id.clone();
            let amount = record.amount;

            if let Err(err) = state.registry.record_reimbursement(&company_id, amount) {
                tracing::error!(%company_id, error = %err, "company totals not updated");
            }
            state.trail.append(caller, event, now, self.retain)
        };

        self.metrics
            .record_executed(prepared.reservation.amount, prepared.fee);
        tracing::info!(
            record_id = prepared.record_id,
            amount = %prepared.reservation.amount,
            fee = %prepared.fee,
            "reimbursement executed"
        );
        self.publish(envelope);
    }

    fn settle_failed(&self, caller: &AccountId, prepared: Prepared, err: TransferError) {
        let now = self.clock.now();
        let indeterminate = err.is_indeterminate();
        let reason = err.to_string();
        let envelope = {
            let mut state = self.state.write();
            let Some(record) = state.records.get_mut(&prepared.record_id) else {
                tracing::error!(record_id = prepared.record_id, "pending record vanished");
                return;
            };
            record.status = RecordStatus::Failed;
            record.settled_at = Some(now);
            record.failure_reason = Some(reason.clone());
            let event = AuditEvent::ReimbursementFailed {
                record_id: record.record_id,
                company_id: record.company_id.clone(),
                recipient: record.recipient.clone(),
                amount: record.amount,
                receipt_fingerprint: record.receipt_fingerprint,
                reason: reason.clone(),
            };
            let company_id = record.company_id.clone();
            let recipient = record.recipient.clone();
            let fingerprint = record.receipt_fingerprint;

            state.replay.clear(&fingerprint);
            state
                .limits
                .release(&company_id, &recipient, &prepared.reservation);
            state.trail.append(caller, event, now, self.retain)
        };

        self.metrics.record_failed();
        tracing::warn!(
            record_id = prepared.record_id,
            %reason,
            indeterminate,
            "reimbursement failed, reservation released"
        );
        self.publish(envelope);
    }

    // Company administration

    /// Register a company (`Admin`)
    pub async fn register_company(
        &self,
        caller: &AccountId,
        company_id: CompanyId,
        treasury: AccountId,
        wallet_kind: WalletKind,
        allowance_module: Option<AccountId>,
    ) -> Result<Company> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, now| {
                let company = state
                    .registry
                    .register(company_id, treasury, wallet_kind, allowance_module, now)?
                    .clone();
                let event = AuditEvent::CompanyRegistered {
                    company_id: company.company_id.clone(),
                    treasury: company.treasury.clone(),
                    wallet_kind: company.wallet_kind,
                    allowance_module: company.allowance_module.clone(),
                };
                Ok((company, Some(event)))
            })
        });
        if let Ok(company) = &result {
            tracing::info!(
                company = %company.company_id,
                treasury = %company.treasury,
                kind = %company.wallet_kind,
                "company registered"
            );
        }
        self.observe(result)
    }

    /// Stop executions for a company (`Admin`); false if already inactive
    pub async fn deactivate_company(&self, caller: &AccountId, company_id: &CompanyId) -> Result<bool> {
        self.set_company_active(caller, company_id, false).await
    }

    /// Resume executions for a company (`Admin`); false if already active
    pub async fn reactivate_company(&self, caller: &AccountId, company_id: &CompanyId) -> Result<bool> {
        self.set_company_active(caller, company_id, true).await
    }

    async fn set_company_active(
        &self,
        caller: &AccountId,
        company_id: &CompanyId,
        active: bool,
    ) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, now| {
                let changed = state.registry.set_active(company_id, active, now)?;
                let event = changed.then(|| {
                    if active {
                        AuditEvent::CompanyReactivated {
                            company_id: company_id.clone(),
                        }
                    } else {
                        AuditEvent::CompanyDeactivated {
                            company_id: company_id.clone(),
                        }
                    }
                });
                Ok((changed, event))
            })
        });
        if let Ok(true) = result {
            tracing::info!(company = %company_id, active, "company activation changed");
        }
        self.observe(result)
    }

    /// Move a company to a new treasury (`Admin`)
    pub async fn update_treasury(
        &self,
        caller: &AccountId,
        company_id: &CompanyId,
        new_treasury: AccountId,
        wallet_kind: WalletKind,
        allowance_module: Option<AccountId>,
    ) -> Result<Company> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, now| {
                let old_treasury = state.registry.update_treasury(
                    company_id,
                    new_treasury,
                    wallet_kind,
                    allowance_module,
                    now,
                )?;
                let company = state
                    .registry
                    .get(company_id)
                    .cloned()
                    .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
                let event = AuditEvent::TreasuryUpdated {
                    company_id: company_id.clone(),
                    old_treasury,
                    new_treasury: company.treasury.clone(),
                    wallet_kind: company.wallet_kind,
                    allowance_module: company.allowance_module.clone(),
                };
                Ok((company, Some(event)))
            })
        });
        if let Ok(company) = &result {
            tracing::info!(company = %company_id, treasury = %company.treasury, "treasury updated");
        }
        self.observe(result)
    }

    // Policy administration

    /// Set per-recipient overrides (`Admin`); zero falls back to the default
    pub async fn set_recipient_limits(
        &self,
        caller: &AccountId,
        company_id: &CompanyId,
        recipient: &AccountId,
        daily_limit: Amount,
        monthly_limit: Amount,
    ) -> Result<()> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, _| {
                if recipient.is_null() {
                    return Err(Error::InvalidRecipient);
                }
                if state.registry.get(company_id).is_none() {
                    return Err(Error::NotRegistered(company_id.clone()));
                }
                state
                    .limits
                    .set_limits(company_id, recipient, daily_limit, monthly_limit)?;
                let event = AuditEvent::RecipientLimitsUpdated {
                    company_id: company_id.clone(),
                    recipient: recipient.clone(),
                    daily_limit,
                    monthly_limit,
                };
                Ok(((), Some(event)))
            })
        });
        self.observe(result)
    }

    /// Replace the fee configuration (`Admin`)
    pub async fn update_fee_config(
        &self,
        caller: &AccountId,
        fee_bps: u16,
        fee_recipient: Option<AccountId>,
    ) -> Result<FeeSchedule> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, _| {
                state.fees.update(fee_bps, fee_recipient)?;
                let fees = state.fees.clone();
                let event = AuditEvent::FeeConfigUpdated {
                    fee_bps: fees.fee_bps(),
                    fee_recipient: fees.fee_recipient().cloned(),
                };
                Ok((fees, Some(event)))
            })
        });
        if let Ok(fees) = &result {
            tracing::info!(fee_bps = fees.fee_bps(), active = fees.is_active(), "fee config updated");
        }
        self.observe(result)
    }

    /// Replace the global default caps (`Admin`)
    pub async fn update_default_limits(
        &self,
        caller: &AccountId,
        daily: Amount,
        monthly: Amount,
    ) -> Result<DefaultLimits> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, _| {
                let defaults = state.limits.set_defaults(daily, monthly)?;
                let event = AuditEvent::DefaultLimitsUpdated {
                    daily: defaults.daily,
                    monthly: defaults.monthly,
                };
                Ok((defaults, Some(event)))
            })
        });
        if let Ok(defaults) = &result {
            tracing::info!(daily = %defaults.daily, monthly = %defaults.monthly, "default limits updated");
        }
        self.observe(result)
    }

    // Circuit breaker

    /// Halt executions (`Pauser`); false if already paused
    pub async fn pause(&self, caller: &AccountId) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Pauser).and_then(|()| {
            self.commit(caller, |state, now| {
                let changed = state.pause.pause(caller, now);
                let event = changed.then(|| AuditEvent::Paused { by: caller.clone() });
                Ok((changed, event))
            })
        });
        if let Ok(true) = result {
            self.metrics.set_paused(true);
            tracing::warn!(by = %caller, "reimbursement execution paused");
        }
        self.observe(result)
    }

    /// Resume executions (`Admin`); false if not paused
    pub async fn unpause(&self, caller: &AccountId) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let result = self.access.require(caller, Role::Admin).and_then(|()| {
            self.commit(caller, |state, _| {
                let changed = state.pause.unpause();
                let event = changed.then(|| AuditEvent::Unpaused { by: caller.clone() });
                Ok((changed, event))
            })
        });
        if let Ok(true) = result {
            self.metrics.set_paused(false);
            tracing::info!(by = %caller, "reimbursement execution resumed");
        }
        self.observe(result)
    }

    // Roles

    /// Grant a role (`Admin`); false if already held
    pub async fn grant_role(&self, caller: &AccountId, role: Role, principal: &AccountId) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let result = self.access.grant(caller, role, principal).and_then(|changed| {
            self.commit(caller, |state, _| {
                state.grants = self.access.export();
                let event = changed.then(|| AuditEvent::RoleGranted {
                    role,
                    principal: principal.clone(),
                });
                Ok((changed, event))
            })
        });
        if let Ok(true) = result {
            tracing::info!(%principal, %role, by = %caller, "role granted");
        }
        self.observe(result)
    }

    /// Revoke a role (`Admin`); false if not held
    pub async fn revoke_role(&self, caller: &AccountId, role: Role, principal: &AccountId) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let result = self.access.revoke(caller, role, principal).and_then(|changed| {
            self.commit(caller, |state, _| {
                state.grants = self.access.export();
                let event = changed.then(|| AuditEvent::RoleRevoked {
                    role,
                    principal: principal.clone(),
                });
                Ok((changed, event))
            })
        });
        if let Ok(true) = result {
            tracing::info!(%principal, %role, by = %caller, "role revoked");
        }
        self.observe(result)
    }

    // Queries

    /// Company by id
    pub fn company(&self, company_id: &CompanyId) -> Option<Company> {
        self.state.read().registry.get(company_id).cloned()
    }

    /// Whether the company exists and is active
    pub fn is_company_active(&self, company_id: &CompanyId) -> bool {
        self.state
            .read()
            .registry
            .get(company_id)
            .is_some_and(|c| c.active)
    }

    /// Company bound to a treasury
    pub fn company_for_treasury(&self, treasury: &AccountId) -> Option<CompanyId> {
        self.state
            .read()
            .registry
            .company_for_treasury(treasury)
            .cloned()
    }

    /// Limit state of a (company, recipient) pair as it stands now
    pub fn recipient_limits(&self, company_id: &CompanyId, recipient: &AccountId) -> Option<RecipientLimits> {
        let now = self.clock.now();
        self.state.read().limits.snapshot(company_id, recipient, now)
    }

    /// Daily capacity left for a recipient
    pub fn remaining_daily_allowance(&self, company_id: &CompanyId, recipient: &AccountId) -> Amount {
        let now = self.clock.now();
        self.state
            .read()
            .limits
            .remaining_daily(company_id, recipient, now)
    }

    /// Monthly capacity left for a recipient
    pub fn remaining_monthly_allowance(&self, company_id: &CompanyId, recipient: &AccountId) -> Amount {
        let now = self.clock.now();
        self.state
            .read()
            .limits
            .remaining_monthly(company_id, recipient, now)
    }

    /// Allowance the company treasury currently grants the engine
    pub async fn treasury_allowance(&self, company_id: &CompanyId) -> Result<Amount> {
        let treasury = self
            .company(company_id)
            .map(|c| c.treasury)
            .ok_or_else(|| Error::NotRegistered(company_id.clone()))?;
        self.bounded(self.provider.allowance(&treasury, &self.engine_account))
            .await
            .map_err(|e| Error::TransferFailed(e.to_string()))
    }

    /// Record by id
    pub fn record(&self, record_id: RecordId) -> Option<ReimbursementRecord> {
        self.state.read().record(record_id).cloned()
    }

    /// Records of one company, by id
    pub fn records_for_company(&self, company_id: &CompanyId) -> Vec<ReimbursementRecord> {
        self.state.read().records_for_company(company_id)
    }

    /// Number of records
    pub fn record_count(&self) -> usize {
        self.state.read().record_count()
    }

    /// Whether a receipt fingerprint is currently marked
    pub fn is_receipt_processed(&self, fingerprint: &Fingerprint) -> bool {
        self.state.read().replay.is_processed(fingerprint)
    }

    /// Current fee configuration
    pub fn fee_config(&self) -> FeeSchedule {
        self.state.read().fees.clone()
    }

    /// Current default caps
    pub fn default_limits(&self) -> DefaultLimits {
        self.state.read().limits.defaults()
    }

    /// Check if paused
    pub fn is_paused(&self) -> bool {
        self.state.read().pause.is_paused()
    }

    /// Check role membership
    pub fn has_role(&self, principal: &AccountId, role: Role) -> bool {
        self.access.has_role(principal, role)
    }

    /// Holders of a role
    pub fn role_members(&self, role: Role) -> Vec<AccountId> {
        self.access.members(role)
    }

    /// Retained audit events after `sequence`
    pub fn audit_events(&self, since_sequence: u64) -> Vec<AuditEnvelope> {
        self.state.read().trail.since(since_sequence)
    }

    /// Verify the retained audit hash chain
    pub fn verify_audit_chain(&self) -> bool {
        self.state.read().trail.verify_chain()
    }

    /// Live audit event stream
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEnvelope> {
        self.events.subscribe()
    }

    /// Engine spender account
    pub fn engine_account(&self) -> &AccountId {
        &self.engine_account
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Snapshots

    /// Write the ledger state to `path`
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let _writer = self.writer.lock().await;
        let bytes = self.state.read().to_bytes()?;
        storage::write_snapshot(path, &bytes)
    }

    /// Replace the ledger state from `path`; false if no snapshot exists
    pub async fn restore_snapshot(&self, path: &Path) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let Some(mut store) = LedgerStore::load_from(path)? else {
            return Ok(false);
        };

        if store.grants.is_empty() {
            store.grants = self.access.export();
        } else {
            self.access.reset(store.grants.iter().cloned());
        }
        self.metrics.set_paused(store.pause.is_paused());
        *self.state.write() = store;
        Ok(true)
    }

    // Internals

    /// Apply one mutation phase and append its event under the write lock
    fn commit<T>(
        &self,
        actor: &AccountId,
        apply: impl FnOnce(&mut LedgerStore, DateTime<Utc>) -> Result<(T, Option<AuditEvent>)>,
    ) -> Result<T> {
        let now = self.clock.now();
        let (value, envelope) = {
            let mut state = self.state.write();
            let (value, event) = apply(&mut state, now)?;
            let envelope = event.map(|e| state.trail.append(actor, e, now, self.retain));
            (value, envelope)
        };
        if let Some(envelope) = envelope {
            self.persist();
            self.publish(envelope);
        }
        Ok(value)
    }

    /// Replace the configured snapshot; callers hold the writer gate
    fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let written = self
            .state
            .read()
            .to_bytes()
            .and_then(|bytes| storage::write_snapshot(path, &bytes));
        if let Err(err) = written {
            self.metrics.record_persist_failure();
            tracing::error!(path = %path.display(), error = %err, "ledger not persisted");
        }
    }

    fn publish(&self, envelope: AuditEnvelope) {
        tracing::debug!(
            sequence = envelope.sequence,
            kind = envelope.event.kind(),
            "audit event"
        );
        // Err only means nobody is subscribed
        let _ = self.events.send(envelope);
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.metrics.record_rejection(err.category());
            tracing::debug!(error = %err, category = err.category().as_str(), "call rejected");
        }
        result
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, TransferError>>,
    ) -> std::result::Result<T, TransferError> {
        match tokio::time::timeout(self.transfer_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::TimedOut {
                after_ms: u64::try_from(self.transfer_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl fmt::Debug for ReimbursementEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReimbursementEngine")
            .field("engine_account", &self.engine_account)
            .field("transfer_timeout", &self.transfer_timeout)
            .field("retain", &self.retain)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryTransferProvider;
    use spend_policy::{ManualClock, DAY_SECONDS};

    struct Fixture {
        engine: ReimbursementEngine,
        provider: Arc<InMemoryTransferProvider>,
        clock: ManualClock,
    }

    fn admin() -> AccountId {
        AccountId::new("admin")
    }

    fn ops() -> AccountId {
        AccountId::new("ops")
    }

    fn acme() -> CompanyId {
        CompanyId::new("acme")
    }

    fn treasury() -> AccountId {
        AccountId::new("treasury")
    }

    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    fn units(n: u64) -> Amount {
        Amount::from_units(n)
    }

    async fn fixture() -> Fixture {
        let config = Config::default();
        let provider = Arc::new(InMemoryTransferProvider::new(config.engine_account()));
        let clock = ManualClock::starting_at(100 * DAY_SECONDS);
        let engine = ReimbursementEngine::new(&config, provider.clone())
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        engine.grant_role(&admin(), Role::Operator, &ops()).await.unwrap();
        engine
            .register_company(&admin(), acme(), treasury(), WalletKind::Eoa, None)
            .await
            .unwrap();
        provider.deposit(&treasury(), units(100_000));
        provider.approve(&treasury(), engine.engine_account(), units(5_000));

        Fixture {
            engine,
            provider,
            clock,
        }
    }

    fn receipt(n: u32) -> Fingerprint {
        Fingerprint::digest(format!("receipt-{}", n))
    }

    #[tokio::test]
    async fn test_execute_records_and_moves_funds() {
        let fx = fixture().await;
        let id = fx
            .engine
            .execute(&ops(), &acme(), &alice(), units(120), receipt(1), receipt(900))
            .await
            .unwrap();

        assert_eq!(id, 1);
        let record = fx.engine.record(id).unwrap();
        assert_eq!(record.status, RecordStatus::Executed);
        assert!(record.settled_at.is_some());
        assert_eq!(fx.provider.balance_of(&alice()), units(120));
        assert_eq!(fx.engine.company(&acme()).unwrap().reimbursement_count, 1);
        assert_eq!(
            fx.engine.remaining_daily_allowance(&acme(), &alice()),
            units(880)
        );
        assert!(fx.engine.is_receipt_processed(&receipt(1)));
        assert_eq!(fx.engine.metrics().executions_succeeded.get(), 1);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let fx = fixture().await;

        let err = fx
            .engine
            .execute(&admin(), &acme(), &alice(), units(1), receipt(1), receipt(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { role: Role::Operator, .. }));

        let err = fx
            .engine
            .execute(&ops(), &acme(), &AccountId::null(), Amount::ZERO, receipt(1), receipt(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRecipient));

        let err = fx
            .engine
            .execute(&ops(), &acme(), &alice(), Amount::ZERO, receipt(1), receipt(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));

        let err = fx
            .engine
            .execute(&ops(), &CompanyId::new("nope"), &alice(), units(1), receipt(1), receipt(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));

        assert_eq!(fx.engine.record_count(), 0);
        assert_eq!(
            fx.engine
                .metrics()
                .rejections
                .with_label_values(&["validation"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_pause_gates_only_execution() {
        let fx = fixture().await;
        let pager = AccountId::new("pager");
        fx.engine.grant_role(&admin(), Role::Pauser, &pager).await.unwrap();

        assert!(fx.engine.pause(&pager).await.unwrap());
        let err = fx
            .engine
            .execute(&ops(), &acme(), &alice(), units(1), receipt(1), receipt(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Paused));

        // Admin calls still work while paused
        fx.engine
            .set_recipient_limits(&admin(), &acme(), &alice(), units(10), units(100))
            .await
            .unwrap();

        let err = fx.engine.unpause(&pager).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized { role: Role::Admin, .. }));
        assert!(fx.engine.unpause(&admin()).await.unwrap());
        assert!(!fx.engine.is_paused());
    }

    #[tokio::test]
    async fn test_day_rollover_restores_capacity() {
        let fx = fixture().await;
        fx.engine
            .execute(&ops(), &acme(), &alice(), units(1_000), receipt(1), receipt(1))
            .await
            .unwrap();
        let err = fx
            .engine
            .execute(&ops(), &acme(), &alice(), units(1), receipt(2), receipt(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExceedsDaily { .. }));
        assert!(!fx.engine.is_receipt_processed(&receipt(2)));

        fx.clock.advance(DAY_SECONDS);
        assert_eq!(fx.engine.remaining_daily_allowance(&acme(), &alice()), units(1_000));
        fx.engine
            .execute(&ops(), &acme(), &alice(), units(1), receipt(2), receipt(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_treasury_allowance_query() {
        let fx = fixture().await;
        assert_eq!(fx.engine.treasury_allowance(&acme()).await.unwrap(), units(5_000));
        assert!(matches!(
            fx.engine.treasury_allowance(&CompanyId::new("nope")).await,
            Err(Error::NotRegistered(_))
        ));
    }
}
