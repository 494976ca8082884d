//! Core types for spend policy
//!
//! Money is carried as an unsigned fixed-point integer with six fractional
//! digits (micro-units). No floating point is used anywhere.

use crate::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits of the unit of account
pub const DECIMALS: u32 = 6;

/// Micro-units per whole unit
pub const UNIT: u128 = 1_000_000;

/// Fixed-point amount (6 decimals)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    /// Zero
    pub const ZERO: Amount = Amount(0);

    /// From raw micro-units
    pub const fn from_micros(micros: u128) -> Self {
        Self(micros)
    }

    /// From whole units (saturates on overflow)
    pub const fn from_units(units: u64) -> Self {
        Self((units as u128).saturating_mul(UNIT))
    }

    /// Raw micro-units
    pub const fn micros(&self) -> u128 {
        self.0
    }

    /// Is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Addition clamped at the maximum
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Addition returning an error on overflow
    pub fn try_add(self, other: Amount) -> Result<Amount> {
        self.checked_add(other)
            .ok_or_else(|| Error::Overflow(format!("{} + {}", self, other)))
    }

    /// `floor(self * numerator / denominator)`
    pub fn mul_div_floor(self, numerator: u128, denominator: u128) -> Result<Amount> {
        if denominator == 0 {
            return Err(Error::Overflow("division by zero".to_string()));
        }
        self.0
            .checked_mul(numerator)
            .map(|v| Amount(v / denominator))
            .ok_or_else(|| Error::Overflow(format!("{} * {}", self, numerator)))
    }

    /// Convert from a decimal, rejecting negatives and sub-micro precision
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(Error::InvalidAmount(format!("negative amount {}", value)));
        }
        let normalized = value.normalize();
        if normalized.scale() > DECIMALS {
            return Err(Error::InvalidAmount(format!(
                "{} has more than {} fractional digits",
                value, DECIMALS
            )));
        }
        let scaled = normalized
            .checked_mul(Decimal::from(UNIT as u64))
            .ok_or_else(|| Error::Overflow(format!("{} does not fit", value)))?;
        scaled
            .trunc()
            .to_u128()
            .map(Amount)
            .ok_or_else(|| Error::InvalidAmount(format!("{} does not fit", value)))
    }

    /// Convert to a decimal (None when the value exceeds decimal range)
    pub fn to_decimal(&self) -> Option<Decimal> {
        i128::try_from(self.0)
            .ok()
            .and_then(|v| Decimal::try_from_i128_with_scale(v, DECIMALS).ok())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / UNIT, self.0 % UNIT)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| Error::InvalidAmount(format!("'{}': {}", s, e)))?;
        Amount::from_decimal(value)
    }
}

/// Account reference (treasury, recipient, principal)
///
/// The empty string is the null account.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The null account
    pub fn null() -> Self {
        Self(String::new())
    }

    /// Is this the null account
    pub fn is_null(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque company key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(String);

impl CompanyId {
    /// Create new company ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CompanyId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
