//! Error types for the reimbursement ledger

use crate::access::Role;
use crate::types::Fingerprint;
use spend_policy::{AccountId, Amount, CompanyId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Everything except `TransferFailed` raised from inside `execute` aborts the
/// call before any state is touched.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller lacks the role the entry point requires
    #[error("Unauthorized: {principal} does not hold role {role}")]
    Unauthorized {
        /// Caller
        principal: AccountId,
        /// Required role
        role: Role,
    },

    /// Recipient is the null account
    #[error("Invalid recipient")]
    InvalidRecipient,

    /// Amount is zero or unrepresentable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Treasury is the null account
    #[error("Invalid treasury")]
    InvalidTreasury,

    /// Daily/monthly caps are inconsistent
    #[error("Invalid limit configuration: {0}")]
    InvalidLimitConfiguration(String),

    /// Fee above the configured ceiling
    #[error("Fee too high: {bps} bps exceeds maximum of {max} bps")]
    FeeTooHigh {
        /// Requested basis points
        bps: u16,
        /// Ceiling
        max: u16,
    },

    /// Company id already known
    #[error("Company already registered: {0}")]
    AlreadyRegistered(CompanyId),

    /// Treasury bound to another company
    #[error("Treasury {treasury} already bound to company {company_id}")]
    TreasuryInUse {
        /// Treasury account
        treasury: AccountId,
        /// Company currently holding it
        company_id: CompanyId,
    },

    /// Company id unknown
    #[error("Company not registered: {0}")]
    NotRegistered(CompanyId),

    /// Company deactivated
    #[error("Company inactive: {0}")]
    Inactive(CompanyId),

    /// Receipt already processed
    #[error("Duplicate receipt: {0}")]
    DuplicateReceipt(Fingerprint),

    /// Daily cap would be exceeded
    #[error("Daily limit exceeded: requested {requested}, remaining {remaining}")]
    ExceedsDaily {
        /// Amount asked for
        requested: Amount,
        /// Capacity left today
        remaining: Amount,
    },

    /// Monthly cap would be exceeded
    #[error("Monthly limit exceeded: requested {requested}, remaining {remaining}")]
    ExceedsMonthly {
        /// Amount asked for
        requested: Amount,
        /// Capacity left this month
        remaining: Amount,
    },

    /// Treasury has not delegated enough to the engine
    #[error("Insufficient allowance: requested {requested}, granted {granted}")]
    InsufficientAllowance {
        /// Amount asked for
        requested: Amount,
        /// Allowance currently granted
        granted: Amount,
    },

    /// Transfer provider reported an error
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Engine is paused
    #[error("Engine paused")]
    Paused,

    /// Fixed-point arithmetic overflowed
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing role
    Authorization,
    /// Malformed request or configuration
    Validation,
    /// Conflicts with existing ledger state
    StateConflict,
    /// Limit or allowance exhausted
    Capacity,
    /// Transfer failure or paused engine
    Execution,
    /// Config, IO, encoding, arithmetic
    Internal,
}

impl ErrorCategory {
    /// Stable label (metrics, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Validation => "validation",
            ErrorCategory::StateConflict => "state_conflict",
            ErrorCategory::Capacity => "capacity",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl Error {
    /// Taxonomy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unauthorized { .. } => ErrorCategory::Authorization,
            Error::InvalidRecipient
            | Error::InvalidAmount(_)
            | Error::InvalidTreasury
            | Error::InvalidLimitConfiguration(_)
            | Error::FeeTooHigh { .. } => ErrorCategory::Validation,
            Error::AlreadyRegistered(_)
            | Error::TreasuryInUse { .. }
            | Error::NotRegistered(_)
            | Error::Inactive(_)
            | Error::DuplicateReceipt(_) => ErrorCategory::StateConflict,
            Error::ExceedsDaily { .. }
            | Error::ExceedsMonthly { .. }
            | Error::InsufficientAllowance { .. } => ErrorCategory::Capacity,
            Error::TransferFailed(_) | Error::Paused => ErrorCategory::Execution,
            Error::Overflow(_) | Error::Config(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<spend_policy::Error> for Error {
    fn from(err: spend_policy::Error) -> Self {
        use spend_policy::Error as Policy;
        match err {
            Policy::ExceedsDaily {
                requested,
                remaining,
            } => Error::ExceedsDaily {
                requested,
                remaining,
            },
            Policy::ExceedsMonthly {
                requested,
                remaining,
            } => Error::ExceedsMonthly {
                requested,
                remaining,
            },
            Policy::InvalidLimitConfiguration(msg) => Error::InvalidLimitConfiguration(msg),
            Policy::FeeTooHigh { bps, max } => Error::FeeTooHigh { bps, max },
            Policy::InvalidAmount(msg) => Error::InvalidAmount(msg),
            Policy::Overflow(msg) => Error::Overflow(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_errors_flatten() {
        let err: Error = spend_policy::Error::ExceedsDaily {
            requested: Amount::from_units(5),
            remaining: Amount::from_units(1),
        }
        .into();
        assert!(matches!(err, Error::ExceedsDaily { .. }));
        assert_eq!(err.category(), ErrorCategory::Capacity);

        let err: Error = spend_policy::Error::FeeTooHigh { bps: 201, max: 200 }.into();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.to_string().contains("201"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::Paused.category(), ErrorCategory::Execution);
        assert_eq!(
            Error::NotRegistered(CompanyId::new("x")).category(),
            ErrorCategory::StateConflict
        );
        assert_eq!(ErrorCategory::StateConflict.as_str(), "state_conflict");
    }
}
