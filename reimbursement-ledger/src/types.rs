//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode snapshots)
//! - Exact arithmetic (fixed-point `Amount` for money)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spend_policy::{AccountId, Amount, CompanyId};
use std::fmt;
use std::str::FromStr;

/// Monotonic reimbursement record id (first id is 1)
pub type RecordId = u64;

/// 32-byte content hash (receipt fingerprint or audit-proof reference)
///
/// Serialized as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw hash bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of arbitrary content
    pub fn digest(content: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(content.as_ref()).into())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How the treasury account is controlled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletKind {
    /// Externally owned account (single key)
    Eoa,
    /// Multisig spending through a delegated allowance module
    DelegatedMultisig,
    /// Programmable smart account
    SmartAccount,
}

impl WalletKind {
    /// Whether an allowance-module reference is meaningful for this kind
    pub fn uses_allowance_module(&self) -> bool {
        matches!(self, WalletKind::DelegatedMultisig)
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletKind::Eoa => write!(f, "EOA"),
            WalletKind::DelegatedMultisig => write!(f, "DelegatedMultisig"),
            WalletKind::SmartAccount => write!(f, "SmartAccount"),
        }
    }
}

/// Registered company
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Company identity
    pub company_id: CompanyId,

    /// Treasury the engine may debit under allowance
    pub treasury: AccountId,

    /// Treasury wallet classification
    pub wallet_kind: WalletKind,

    /// Allowance module (only kept for `DelegatedMultisig`)
    pub allowance_module: Option<AccountId>,

    /// Executions allowed while true
    pub active: bool,

    /// Registration time
    pub registered_at: DateTime<Utc>,

    /// Last registry change
    pub updated_at: DateTime<Utc>,

    /// Sum of executed gross amounts
    pub total_reimbursed: Amount,

    /// Number of executed reimbursements
    pub reimbursement_count: u64,
}

/// Record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Written before the transfer is attempted
    Pending,
    /// Transfer succeeded (terminal)
    Executed,
    /// Transfer failed and effects were rolled back (terminal)
    Failed,
    /// Reserved for administrative use
    Cancelled,
}

impl RecordStatus {
    /// Check if terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

/// One execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimbursementRecord {
    /// Record id
    pub record_id: RecordId,

    /// Company debited
    pub company_id: CompanyId,

    /// Reimbursed account
    pub recipient: AccountId,

    /// Gross amount (net + fee)
    pub amount: Amount,

    /// Fee withheld
    pub fee: Amount,

    /// Amount sent to the recipient
    pub net_amount: Amount,

    /// Receipt content hash
    pub receipt_fingerprint: Fingerprint,

    /// External approval reference
    pub audit_proof: Fingerprint,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Time the record reached a terminal status
    pub settled_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: RecordStatus,

    /// Provider error for failed records
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex_round_trip() {
        let fp = Fingerprint::digest(b"receipt-0001.pdf");
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);

        let prefixed: Fingerprint = format!("0x{}", fp).parse().unwrap();
        assert_eq!(prefixed, fp);

        assert!("zz".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_record_status_terminal() {
        assert!(!RecordStatus::Pending.is_terminal());
        assert!(RecordStatus::Executed.is_terminal());
        assert!(RecordStatus::Failed.is_terminal());
        assert!(RecordStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_wallet_kind_allowance_module() {
        assert!(WalletKind::DelegatedMultisig.uses_allowance_module());
        assert!(!WalletKind::Eoa.uses_allowance_module());
        assert_eq!(WalletKind::Eoa.to_string(), "EOA");
    }
}
