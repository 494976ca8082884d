//! Global circuit breaker for reimbursement execution
//!
//! Only execution is gated. Administrative calls stay available while
//! paused so misconfiguration can be fixed during an incident.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spend_policy::AccountId;

/// Pause switch status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseSwitch {
    /// Paused
    paused: bool,
    /// Who paused
    paused_by: Option<AccountId>,
    /// When paused
    paused_at: Option<DateTime<Utc>>,
}

impl PauseSwitch {
    /// Running switch
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Principal that paused, while paused
    pub fn paused_by(&self) -> Option<&AccountId> {
        self.paused_by.as_ref()
    }

    /// Pause time, while paused
    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    /// Pause; returns false if already paused
    pub fn pause(&mut self, by: &AccountId, at: DateTime<Utc>) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.paused_by = Some(by.clone());
        self.paused_at = Some(at);
        true
    }

    /// Resume; returns false if not paused
    pub fn unpause(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        *self = Self::default();
        true
    }

    /// Fail with `Paused` while paused
    pub fn ensure_running(&self) -> Result<()> {
        if self.paused {
            Err(Error::Paused)
        } else {
            Ok(())
        }
    }
}
