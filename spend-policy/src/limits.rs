//! Per-recipient daily and monthly spend limits
//!
//! Counters live per (company, recipient) and reset lazily: whenever an
//! access observes a window index different from the stored watermark, the
//! counter is zeroed and the watermark advanced before any check. There is
//! no background timer.
//!
//! A reservation increments both counters up front. If the transfer it was
//! taken for fails, [`LimitTracker::release`] undoes it.

use crate::clock::WindowIndex;
use crate::{AccountId, Amount, CompanyId, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Global fallback caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultLimits {
    /// Cap per day window
    pub daily: Amount,

    /// Cap per month window
    pub monthly: Amount,
}

impl DefaultLimits {
    /// Validated defaults: both non-zero, daily not above monthly
    pub fn new(daily: Amount, monthly: Amount) -> Result<Self> {
        if daily.is_zero() || monthly.is_zero() {
            return Err(Error::InvalidLimitConfiguration(
                "default limits must be non-zero".to_string(),
            ));
        }
        if daily > monthly {
            return Err(Error::InvalidLimitConfiguration(format!(
                "default daily limit {} exceeds monthly limit {}",
                daily, monthly
            )));
        }
        Ok(Self { daily, monthly })
    }
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            daily: Amount::from_units(1_000),    // $1k
            monthly: Amount::from_units(10_000), // $10k
        }
    }
}

/// Limit state for one (company, recipient) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientLimits {
    /// Daily override (zero = use default)
    pub daily_limit: Amount,

    /// Monthly override (zero = use default)
    pub monthly_limit: Amount,

    /// Spent in the window named by `last_day_watermark`
    pub daily_spent: Amount,

    /// Spent in the window named by `last_month_watermark`
    pub monthly_spent: Amount,

    /// Day index the daily counter belongs to
    pub last_day_watermark: u64,

    /// Month index the monthly counter belongs to
    pub last_month_watermark: u64,
}

impl RecipientLimits {
    /// Effective daily cap
    pub fn effective_daily(&self, defaults: &DefaultLimits) -> Amount {
        if self.daily_limit.is_zero() {
            defaults.daily
        } else {
            self.daily_limit
        }
    }

    /// Effective monthly cap
    pub fn effective_monthly(&self, defaults: &DefaultLimits) -> Amount {
        if self.monthly_limit.is_zero() {
            defaults.monthly
        } else {
            self.monthly_limit
        }
    }

    /// Copy with counters rolled forward to `window`
    pub fn rolled_to(&self, window: WindowIndex) -> Self {
        let mut rolled = self.clone();
        if rolled.last_day_watermark != window.day {
            rolled.daily_spent = Amount::ZERO;
            rolled.last_day_watermark = window.day;
        }
        if rolled.last_month_watermark != window.month {
            rolled.monthly_spent = Amount::ZERO;
            rolled.last_month_watermark = window.month;
        }
        rolled
    }
}

/// Capacity taken by a successful [`LimitTracker::reserve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reserved amount
    pub amount: Amount,

    /// Day window the daily counter was charged in
    pub day: u64,

    /// Month window the monthly counter was charged in
    pub month: u64,
}

/// Rolling daily/monthly spend tracker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitTracker {
    defaults: DefaultLimits,
    entries: HashMap<(CompanyId, AccountId), RecipientLimits>,
}

impl LimitTracker {
    /// Create new tracker
    pub fn new(defaults: DefaultLimits) -> Self {
        Self {
            defaults,
            entries: HashMap::new(),
        }
    }

    /// Global fallback caps
    pub fn defaults(&self) -> DefaultLimits {
        self.defaults
    }

    /// Replace the global fallback caps
    pub fn set_defaults(&mut self, daily: Amount, monthly: Amount) -> Result<DefaultLimits> {
        let defaults = DefaultLimits::new(daily, monthly)?;
        self.defaults = defaults;
        Ok(defaults)
    }

    /// Set per-recipient overrides (zero = fall back to default)
    pub fn set_limits(
        &mut self,
        company_id: &CompanyId,
        recipient: &AccountId,
        daily: Amount,
        monthly: Amount,
    ) -> Result<()> {
        if !daily.is_zero() && !monthly.is_zero() && daily > monthly {
            return Err(Error::InvalidLimitConfiguration(format!(
                "daily limit {} exceeds monthly limit {}",
                daily, monthly
            )));
        }
        let entry = self
            .entries
            .entry((company_id.clone(), recipient.clone()))
            .or_default();
        entry.daily_limit = daily;
        entry.monthly_limit = monthly;
        Ok(())
    }

    /// Check capacity and charge both counters
    pub fn reserve(
        &mut self,
        company_id: &CompanyId,
        recipient: &AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let window = WindowIndex::at(now);
        let key = (company_id.clone(), recipient.clone());
        let mut limits = self
            .entries
            .get(&key)
            .map(|l| l.rolled_to(window))
            .unwrap_or_else(|| RecipientLimits::default().rolled_to(window));

        let daily_cap = limits.effective_daily(&self.defaults);
        let new_daily = match limits.daily_spent.checked_add(amount) {
            Some(total) if total <= daily_cap => total,
            _ => {
                return Err(Error::ExceedsDaily {
                    requested: amount,
                    remaining: daily_cap.saturating_sub(limits.daily_spent),
                })
            }
        };

        let monthly_cap = limits.effective_monthly(&self.defaults);
        let new_monthly = match limits.monthly_spent.checked_add(amount) {
            Some(total) if total <= monthly_cap => total,
            _ => {
                return Err(Error::ExceedsMonthly {
                    requested: amount,
                    remaining: monthly_cap.saturating_sub(limits.monthly_spent),
                })
            }
        };

        limits.daily_spent = new_daily;
        limits.monthly_spent = new_monthly;
        self.entries.insert(key, limits);

        tracing::debug!(
            company = %company_id,
            recipient = %recipient,
            %amount,
            daily_spent = %new_daily,
            monthly_spent = %new_monthly,
            "limit capacity reserved"
        );

        Ok(Reservation {
            amount,
            day: window.day,
            month: window.month,
        })
    }

    /// Undo a reservation; counters from a later window are left alone
    pub fn release(
        &mut self,
        company_id: &CompanyId,
        recipient: &AccountId,
        reservation: &Reservation,
    ) {
        let Some(limits) = self
            .entries
            .get_mut(&(company_id.clone(), recipient.clone()))
        else {
            return;
        };

        if limits.last_day_watermark == reservation.day {
            limits.daily_spent = limits.daily_spent.saturating_sub(reservation.amount);
        }
        if limits.last_month_watermark == reservation.month {
            limits.monthly_spent = limits.monthly_spent.saturating_sub(reservation.amount);
        }
    }

    /// Limit state as it stands at `now` (None if never touched)
    pub fn snapshot(
        &self,
        company_id: &CompanyId,
        recipient: &AccountId,
        now: DateTime<Utc>,
    ) -> Option<RecipientLimits> {
        self.entries
            .get(&(company_id.clone(), recipient.clone()))
            .map(|l| l.rolled_to(WindowIndex::at(now)))
    }

    /// Daily capacity left at `now`
    pub fn remaining_daily(
        &self,
        company_id: &CompanyId,
        recipient: &AccountId,
        now: DateTime<Utc>,
    ) -> Amount {
        let limits = self
            .snapshot(company_id, recipient, now)
            .unwrap_or_default();
        limits
            .effective_daily(&self.defaults)
            .saturating_sub(limits.daily_spent)
    }

    /// Monthly capacity left at `now`
    pub fn remaining_monthly(
        &self,
        company_id: &CompanyId,
        recipient: &AccountId,
        now: DateTime<Utc>,
    ) -> Amount {
        let limits = self
            .snapshot(company_id, recipient, now)
            .unwrap_or_default();
        limits
            .effective_monthly(&self.defaults)
            .saturating_sub(limits.monthly_spent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, DAY_SECONDS, MONTH_SECONDS};
    use proptest::prelude::*;

    fn ids() -> (CompanyId, AccountId) {
        (CompanyId::new("acme"), AccountId::new("alice"))
    }

    fn units(n: u64) -> Amount {
        Amount::from_units(n)
    }

    #[test]
    fn test_reserve_within_daily_limit() {
        let clock = ManualClock::starting_at(10 * DAY_SECONDS);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        tracker.reserve(&company, &recipient, units(600), clock.now()).unwrap();
        tracker.reserve(&company, &recipient, units(400), clock.now()).unwrap();

        let err = tracker
            .reserve(&company, &recipient, Amount::from_micros(1), clock.now())
            .unwrap_err();
        assert!(matches!(err, Error::ExceedsDaily { .. }));

        let limits = tracker.snapshot(&company, &recipient, clock.now()).unwrap();
        assert_eq!(limits.daily_spent, units(1_000));
        assert_eq!(limits.monthly_spent, units(1_000));
    }

    #[test]
    fn test_failed_reserve_leaves_counters_unchanged() {
        let clock = ManualClock::starting_at(0);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        tracker.reserve(&company, &recipient, units(700), clock.now()).unwrap();
        assert!(tracker.reserve(&company, &recipient, units(301), clock.now()).is_err());

        let limits = tracker.snapshot(&company, &recipient, clock.now()).unwrap();
        assert_eq!(limits.daily_spent, units(700));
        assert_eq!(tracker.remaining_daily(&company, &recipient, clock.now()), units(300));
    }

    #[test]
    fn test_day_rollover_resets_daily_counter() {
        let clock = ManualClock::starting_at(3 * DAY_SECONDS + 10);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        tracker.reserve(&company, &recipient, units(1_000), clock.now()).unwrap();
        clock.advance(DAY_SECONDS);

        tracker.reserve(&company, &recipient, units(1_000), clock.now()).unwrap();
        let limits = tracker.snapshot(&company, &recipient, clock.now()).unwrap();
        assert_eq!(limits.daily_spent, units(1_000));
        assert_eq!(limits.monthly_spent, units(2_000));
        assert_eq!(limits.last_day_watermark, 4);
    }

    #[test]
    fn test_monthly_limit_and_rollover() {
        let clock = ManualClock::starting_at(0);
        let mut tracker = LimitTracker::new(DefaultLimits::new(units(500), units(1_000)).unwrap());
        let (company, recipient) = ids();

        tracker.reserve(&company, &recipient, units(500), clock.now()).unwrap();
        clock.advance(DAY_SECONDS);
        tracker.reserve(&company, &recipient, units(500), clock.now()).unwrap();
        clock.advance(DAY_SECONDS);

        let err = tracker
            .reserve(&company, &recipient, units(1), clock.now())
            .unwrap_err();
        assert_eq!(
            err,
            Error::ExceedsMonthly {
                requested: units(1),
                remaining: Amount::ZERO
            }
        );

        clock.set(MONTH_SECONDS);
        tracker.reserve(&company, &recipient, units(500), clock.now()).unwrap();
        assert_eq!(tracker.remaining_monthly(&company, &recipient, clock.now()), units(500));
    }

    #[test]
    fn test_overrides_and_fallback() {
        let clock = ManualClock::starting_at(0);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        tracker.set_limits(&company, &recipient, units(50), Amount::ZERO).unwrap();
        assert_eq!(tracker.remaining_daily(&company, &recipient, clock.now()), units(50));
        assert_eq!(tracker.remaining_monthly(&company, &recipient, clock.now()), units(10_000));

        assert!(tracker.reserve(&company, &recipient, units(51), clock.now()).is_err());

        let err = tracker
            .set_limits(&company, &recipient, units(200), units(100))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLimitConfiguration(_)));
    }

    #[test]
    fn test_release_restores_capacity() {
        let clock = ManualClock::starting_at(0);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        let reservation = tracker.reserve(&company, &recipient, units(250), clock.now()).unwrap();
        tracker.release(&company, &recipient, &reservation);

        let limits = tracker.snapshot(&company, &recipient, clock.now()).unwrap();
        assert_eq!(limits.daily_spent, Amount::ZERO);
        assert_eq!(limits.monthly_spent, Amount::ZERO);
    }

    #[test]
    fn test_release_after_day_rollover_keeps_new_window() {
        let clock = ManualClock::starting_at(DAY_SECONDS - 5);
        let mut tracker = LimitTracker::new(DefaultLimits::default());
        let (company, recipient) = ids();

        let stale = tracker.reserve(&company, &recipient, units(100), clock.now()).unwrap();
        clock.advance(10);
        tracker.reserve(&company, &recipient, units(40), clock.now()).unwrap();
        tracker.release(&company, &recipient, &stale);

        let limits = tracker.snapshot(&company, &recipient, clock.now()).unwrap();
        assert_eq!(limits.daily_spent, units(40));
        assert_eq!(limits.monthly_spent, units(40));
    }

    #[test]
    fn test_default_limits_validation() {
        assert!(DefaultLimits::new(Amount::ZERO, units(1)).is_err());
        assert!(DefaultLimits::new(units(2), units(1)).is_err());

        let mut tracker = LimitTracker::default();
        assert!(tracker.set_defaults(units(10), units(5)).is_err());
        assert_eq!(tracker.defaults(), DefaultLimits::default());
    }

    proptest! {
        /// Successful reservations within one day never sum past the cap
        #[test]
        fn prop_daily_sum_bounded(amounts in prop::collection::vec(1u64..400, 1..30)) {
            let clock = ManualClock::starting_at(42 * DAY_SECONDS);
            let mut tracker = LimitTracker::new(DefaultLimits::default());
            let (company, recipient) = ids();
            let mut accepted = Amount::ZERO;

            for n in amounts {
                let before = tracker
                    .snapshot(&company, &recipient, clock.now())
                    .unwrap_or_default()
                    .daily_spent;
                match tracker.reserve(&company, &recipient, units(n), clock.now()) {
                    Ok(_) => accepted = accepted.checked_add(units(n)).unwrap(),
                    Err(Error::ExceedsDaily { .. }) => {
                        let after = tracker
                            .snapshot(&company, &recipient, clock.now())
                            .unwrap_or_default()
                            .daily_spent;
                        prop_assert_eq!(before, after);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
            }

            prop_assert!(accepted <= DefaultLimits::default().daily);
        }
    }
}
