//! Error types for spend policy

use crate::Amount;
use thiserror::Error;

/// Spend policy error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Daily cap would be exceeded
    #[error("Daily limit exceeded: requested {requested}, remaining {remaining}")]
    ExceedsDaily {
        /// Amount asked for
        requested: Amount,
        /// Capacity left in the current day window
        remaining: Amount,
    },

    /// Monthly cap would be exceeded
    #[error("Monthly limit exceeded: requested {requested}, remaining {remaining}")]
    ExceedsMonthly {
        /// Amount asked for
        requested: Amount,
        /// Capacity left in the current month window
        remaining: Amount,
    },

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

    /// Amount could not be represented
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Fixed-point arithmetic overflowed
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
