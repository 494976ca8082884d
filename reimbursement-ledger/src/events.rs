//! Audit events
//!
//! Every state change the engine commits produces one [`AuditEvent`]. Events
//! are wrapped in an [`AuditEnvelope`] carrying a sequence number and a
//! SHA-256 hash chained to the previous envelope, so any edit to a retained
//! entry breaks [`AuditTrail::verify_chain`].
//!
//! The trail is part of the ledger store: an event is appended in the same
//! critical section as the state change it describes.

use crate::access::Role;
use crate::types::{Fingerprint, RecordId, WalletKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spend_policy::{AccountId, Amount, CompanyId};
use std::collections::VecDeque;
use uuid::Uuid;

/// Ledger state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// Company created
    CompanyRegistered {
        /// Company
        company_id: CompanyId,
        /// Bound treasury
        treasury: AccountId,
        /// Treasury wallet kind
        wallet_kind: WalletKind,
        /// Allowance module, if any
        allowance_module: Option<AccountId>,
    },

    /// Company stopped accepting executions
    CompanyDeactivated {
        /// Company
        company_id: CompanyId,
    },

    /// Company resumed accepting executions
    CompanyReactivated {
        /// Company
        company_id: CompanyId,
    },

    /// Company moved to another treasury
    TreasuryUpdated {
        /// Company
        company_id: CompanyId,
        /// Previous treasury
        old_treasury: AccountId,
        /// New treasury
        new_treasury: AccountId,
        /// New wallet kind
        wallet_kind: WalletKind,
        /// New allowance module
        allowance_module: Option<AccountId>,
    },

    /// Transfer succeeded
    ReimbursementExecuted {
        /// Record
        record_id: RecordId,
        /// Company debited
        company_id: CompanyId,
        /// Recipient credited
        recipient: AccountId,
        /// Gross amount
        amount: Amount,
        /// Fee withheld
        fee: Amount,
        /// Amount the recipient received
        net_amount: Amount,
        /// Receipt fingerprint
        receipt_fingerprint: Fingerprint,
        /// Approval reference
        audit_proof: Fingerprint,
    },

    /// Transfer failed and the attempt was rolled back
    ReimbursementFailed {
        /// Record
        record_id: RecordId,
        /// Company
        company_id: CompanyId,
        /// Intended recipient
        recipient: AccountId,
        /// Gross amount
        amount: Amount,
        /// Receipt fingerprint (released for retry)
        receipt_fingerprint: Fingerprint,
        /// Provider error
        reason: String,
    },

    /// Per-recipient overrides changed
    RecipientLimitsUpdated {
        /// Company
        company_id: CompanyId,
        /// Recipient
        recipient: AccountId,
        /// Daily override (zero = default)
        daily_limit: Amount,
        /// Monthly override (zero = default)
        monthly_limit: Amount,
    },

    /// Fee configuration changed
    FeeConfigUpdated {
        /// Basis points
        fee_bps: u16,
        /// Fee recipient
        fee_recipient: Option<AccountId>,
    },

    /// Global default caps changed
    DefaultLimitsUpdated {
        /// Daily default
        daily: Amount,
        /// Monthly default
        monthly: Amount,
    },

    /// Execution paused
    Paused {
        /// Pauser
        by: AccountId,
    },

    /// Execution resumed
    Unpaused {
        /// Admin
        by: AccountId,
    },

    /// Role granted
    RoleGranted {
        /// Role
        role: Role,
        /// New holder
        principal: AccountId,
    },

    /// Role revoked
    RoleRevoked {
        /// Role
        role: Role,
        /// Former holder
        principal: AccountId,
    },
}

impl AuditEvent {
    /// Stable event name (logs, metrics)
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::CompanyRegistered { .. } => "company_registered",
            AuditEvent::CompanyDeactivated { .. } => "company_deactivated",
            AuditEvent::CompanyReactivated { .. } => "company_reactivated",
            AuditEvent::TreasuryUpdated { .. } => "treasury_updated",
            AuditEvent::ReimbursementExecuted { .. } => "reimbursement_executed",
            AuditEvent::ReimbursementFailed { .. } => "reimbursement_failed",
            AuditEvent::RecipientLimitsUpdated { .. } => "recipient_limits_updated",
            AuditEvent::FeeConfigUpdated { .. } => "fee_config_updated",
            AuditEvent::DefaultLimitsUpdated { .. } => "default_limits_updated",
            AuditEvent::Paused { .. } => "paused",
            AuditEvent::Unpaused { .. } => "unpaused",
            AuditEvent::RoleGranted { .. } => "role_granted",
            AuditEvent::RoleRevoked { .. } => "role_revoked",
        }
    }
}

/// Sequenced, hash-chained event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEnvelope {
    /// Position in the trail (first is 1)
    pub sequence: u64,

    /// Unique event id (UUIDv7, time-ordered)
    pub event_id: Uuid,

    /// Commit time
    pub timestamp: DateTime<Utc>,

    /// Principal whose call produced the event
    pub actor: AccountId,

    /// Payload
    pub event: AuditEvent,

    /// Hash of the preceding envelope (empty for the first)
    pub previous_hash: String,

    /// Hash of this envelope
    pub hash: String,
}

impl AuditEnvelope {
    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.actor.as_str().as_bytes());
        hasher.update(serde_json::to_vec(&self.event).unwrap_or_default());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check the stored hash against the content
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Append-only, bounded event trail
///
/// Keeps at most `retain` envelopes in memory (0 keeps everything). Sequence
/// numbers and the hash chain continue across evictions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    entries: VecDeque<AuditEnvelope>,
    last_sequence: u64,
    last_hash: String,
}

impl AuditTrail {
    /// Create empty trail
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its envelope
    pub fn append(
        &mut self,
        actor: &AccountId,
        event: AuditEvent,
        at: DateTime<Utc>,
        retain: usize,
    ) -> AuditEnvelope {
        let mut envelope = AuditEnvelope {
            sequence: self.last_sequence + 1,
            event_id: Uuid::now_v7(),
            timestamp: at,
            actor: actor.clone(),
            event,
            previous_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        envelope.hash = envelope.compute_hash();

        self.last_sequence = envelope.sequence;
        self.last_hash = envelope.hash.clone();
        self.entries.push_back(envelope.clone());
        if retain > 0 {
            while self.entries.len() > retain {
                self.entries.pop_front();
            }
        }
        envelope
    }

    /// Retained envelopes with a sequence greater than `sequence`
    pub fn since(&self, sequence: u64) -> Vec<AuditEnvelope> {
        self.entries
            .iter()
            .filter(|e| e.sequence > sequence)
            .cloned()
            .collect()
    }

    /// Sequence of the most recent event (0 when nothing was emitted)
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of retained envelopes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify hashes, linkage and sequence continuity of retained envelopes
    pub fn verify_chain(&self) -> bool {
        let mut previous: Option<&AuditEnvelope> = None;
        for envelope in &self.entries {
            if !envelope.verify_hash() {
                tracing::error!(sequence = envelope.sequence, "audit hash mismatch");
                return false;
            }
            let linked = match previous {
                Some(prev) => {
                    envelope.previous_hash == prev.hash && envelope.sequence == prev.sequence + 1
                }
                None => envelope.sequence != 1 || envelope.previous_hash.is_empty(),
            };
            if !linked {
                tracing::error!(sequence = envelope.sequence, "audit chain broken");
                return false;
            }
            previous = Some(envelope);
        }
        previous.map_or(true, |last| {
            last.sequence == self.last_sequence && last.hash == self.last_hash
        })
    }
}
