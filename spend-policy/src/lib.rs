//! Spend policy for delegated reimbursements
//!
//! Fixed-point money, rolling per-recipient daily/monthly caps and the
//! basis-point fee schedule used by the reimbursement ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod fees;
pub mod limits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, DAY_SECONDS, MONTH_SECONDS};
pub use error::{Error, Result};
pub use fees::{FeeSchedule, MAX_FEE_BPS};
pub use limits::{DefaultLimits, LimitTracker, RecipientLimits, Reservation};
pub use types::*;
