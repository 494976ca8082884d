//! Non-custodial reimbursement ledger
//!
//! Authorizes and records reimbursements paid from company treasuries under
//! a bounded allowance delegated to the engine. The engine never holds
//! funds; value moves through a pluggable [`TransferProvider`].
//!
//! # Architecture
//!
//! - **Single Writer**: one writer gate serializes every mutating call
//! - **Two-Phase Limits**: capacity is reserved before the transfer and released on failure
//! - **Atomic Legs**: net and fee legs move in one all-or-nothing batch
//! - **Hash-Chained Audit Trail**: every committed change emits a sequenced event
//!
//! # Invariants
//!
//! - Treasury ↔ company is a bijection
//! - A receipt fingerprint is executed at most once while its mark stands
//! - `daily_spent` / `monthly_spent` never exceed the effective caps
//! - No `Pending` record survives an `execute` call

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod access;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pause;
pub mod registry;
pub mod replay;
pub mod storage;
pub mod transfer;
pub mod types;

// Re-exports
pub use access::{AccessGate, Role};
pub use config::Config;
pub use engine::ReimbursementEngine;
pub use error::{Error, ErrorCategory, Result};
pub use events::{AuditEnvelope, AuditEvent, AuditTrail};
pub use metrics::Metrics;
pub use storage::LedgerStore;
pub use transfer::{InMemoryTransferProvider, TransferError, TransferLeg, TransferProvider};
pub use types::{Company, Fingerprint, RecordId, RecordStatus, ReimbursementRecord, WalletKind};

pub use spend_policy::{AccountId, Amount, CompanyId, DefaultLimits, FeeSchedule, RecipientLimits};
