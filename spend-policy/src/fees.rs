//! Basis-point fee schedule

use crate::{AccountId, Amount, Error, Result};
use serde::{Deserialize, Serialize};

/// Highest fee accepted at configuration time (2%)
pub const MAX_FEE_BPS: u16 = 200;

/// Basis points in one whole
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Global fee configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    fee_bps: u16,
    fee_recipient: Option<AccountId>,
}

impl FeeSchedule {
    /// Create a validated schedule
    pub fn new(fee_bps: u16, fee_recipient: Option<AccountId>) -> Result<Self> {
        if fee_bps > MAX_FEE_BPS {
            return Err(Error::FeeTooHigh {
                bps: fee_bps,
                max: MAX_FEE_BPS,
            });
        }
        Ok(Self {
            fee_bps,
            fee_recipient: fee_recipient.filter(|r| !r.is_null()),
        })
    }

    /// Replace the schedule; on error the current one is kept
    pub fn update(&mut self, fee_bps: u16, fee_recipient: Option<AccountId>) -> Result<()> {
        *self = Self::new(fee_bps, fee_recipient)?;
        Ok(())
    }

    /// Configured basis points
    pub fn fee_bps(&self) -> u16 {
        self.fee_bps
    }

    /// Configured fee recipient
    pub fn fee_recipient(&self) -> Option<&AccountId> {
        self.fee_recipient.as_ref()
    }

    /// Whether a non-zero fee can be charged
    pub fn is_active(&self) -> bool {
        self.fee_bps > 0 && self.fee_recipient.is_some()
    }

    /// `floor(amount * fee_bps / 10_000)`, or zero when inactive
    pub fn fee(&self, amount: Amount) -> Amount {
        if !self.is_active() {
            return Amount::ZERO;
        }
        // fee_bps <= 200 so the product only overflows for amounts near u128::MAX
        amount
            .mul_div_floor(self.fee_bps as u128, BPS_DENOMINATOR)
            .unwrap_or_else(|_| {
                Amount::from_micros(amount.micros() / BPS_DENOMINATOR * self.fee_bps as u128)
            })
    }

    /// `(fee, net)` for a gross amount
    pub fn split(&self, amount: Amount) -> (Amount, Amount) {
        let fee = self.fee(amount);
        (fee, amount.saturating_sub(fee))
    }
}
