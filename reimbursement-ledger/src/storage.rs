//! Ledger state and snapshots
//!
//! [`LedgerStore`] owns every piece of mutable ledger state: registry, limit
//! counters, fee config, replay marks, pause switch, records, role grants
//! and the audit trail. The engine holds exactly one store; mutations go
//! through it inside a single write critical section per phase.
//!
//! # Snapshot format
//!
//! `bincode` of `(SNAPSHOT_VERSION, LedgerStore)`. Files are written to a
//! temporary sibling, synced and renamed into place. A store holding a
//! `Pending` record is never encoded.

use crate::{
    access::Role,
    error::{Error, Result},
    events::AuditTrail,
    pause::PauseSwitch,
    registry::CompanyRegistry,
    replay::ReplayGuard,
    types::{RecordId, RecordStatus, ReimbursementRecord},
};
use serde::{Deserialize, Serialize};
use spend_policy::{AccountId, CompanyId, DefaultLimits, FeeSchedule, LimitTracker};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Snapshot file name under the data directory
pub const SNAPSHOT_FILE: &str = "ledger.snapshot";

/// Snapshot encoding version
const SNAPSHOT_VERSION: u32 = 1;

/// All mutable ledger state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStore {
    pub(crate) registry: CompanyRegistry,
    pub(crate) limits: LimitTracker,
    pub(crate) fees: FeeSchedule,
    pub(crate) replay: ReplayGuard,
    pub(crate) pause: PauseSwitch,
    pub(crate) records: BTreeMap<RecordId, ReimbursementRecord>,
    pub(crate) grants: Vec<(AccountId, Role)>,
    pub(crate) trail: AuditTrail,
    last_record_id: RecordId,
}

impl LedgerStore {
    /// Empty store with the given policy configuration
    pub fn new(defaults: DefaultLimits, fees: FeeSchedule) -> Self {
        Self {
            limits: LimitTracker::new(defaults),
            fees,
            ..Self::default()
        }
    }

    /// Next record id (first is 1)
    pub(crate) fn allocate_record_id(&mut self) -> RecordId {
        self.last_record_id += 1;
        self.last_record_id
    }

    /// Company registry
    pub fn registry(&self) -> &CompanyRegistry {
        &self.registry
    }

    /// Limit tracker
    pub fn limits(&self) -> &LimitTracker {
        &self.limits
    }

    /// Fee configuration
    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Replay guard
    pub fn replay(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Pause switch
    pub fn pause(&self) -> &PauseSwitch {
        &self.pause
    }

    /// Audit trail
    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    /// Role grants as of the last change
    pub fn grants(&self) -> &[(AccountId, Role)] {
        &self.grants
    }

    /// Look up a record
    pub fn record(&self, record_id: RecordId) -> Option<&ReimbursementRecord> {
        self.records.get(&record_id)
    }

    /// Records of one company, by id
    pub fn records_for_company(&self, company_id: &CompanyId) -> Vec<ReimbursementRecord> {
        self.records
            .values()
            .filter(|r| &r.company_id == company_id)
            .cloned()
            .collect()
    }

    /// Number of records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of records still `Pending`
    pub fn pending_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == RecordStatus::Pending)
            .count()
    }

    /// Encode as a snapshot
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.ensure_settled()?;
        Ok(bincode::serialize(&(SNAPSHOT_VERSION, self))?)
    }

    fn ensure_settled(&self) -> Result<()> {
        match self.pending_count() {
            0 => Ok(()),
            n => Err(Error::Config(format!(
                "snapshot contains {} pending records",
                n
            ))),
        }
    }

    /// Decode a snapshot
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, store): (u32, LedgerStore) = bincode::deserialize(bytes)?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Config(format!(
                "unsupported snapshot version {} (expected {})",
                version, SNAPSHOT_VERSION
            )));
        }
        store.ensure_settled()?;
        Ok(store)
    }

    /// Write a snapshot file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_snapshot(path, &bytes)?;

        tracing::info!(
            path = %path.display(),
            bytes = bytes.len(),
            records = self.records.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Read a snapshot file; `None` if it does not exist
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let store = Self::from_bytes(&bytes)?;

        tracing::info!(
            path = %path.display(),
            companies = store.registry.len(),
            records = store.records.len(),
            "snapshot loaded"
        );
        Ok(Some(store))
    }
}

/// Durably replace the snapshot at `path` with `bytes`
pub fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        // Directory fsync is unsupported on some platforms
        if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!(error = %err, "snapshot directory not synced");
        }
    }

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "snapshot replaced");
    Ok(())
}
