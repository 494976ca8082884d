//! Receipt replay protection

use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Set of processed receipt fingerprints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayGuard {
    processed: HashSet<Fingerprint>,
}

impl ReplayGuard {
    /// Create empty guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a fingerprint; false if it was already marked
    pub fn try_mark(&mut self, fingerprint: Fingerprint) -> bool {
        self.processed.insert(fingerprint)
    }

    /// Remove a mark so the receipt can be retried
    pub fn clear(&mut self, fingerprint: &Fingerprint) {
        self.processed.remove(fingerprint);
    }

    /// Check if processed
    pub fn is_processed(&self, fingerprint: &Fingerprint) -> bool {
        self.processed.contains(fingerprint)
    }

    /// Number of marked fingerprints
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
