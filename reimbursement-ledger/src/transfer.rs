//! Transfer provider integration
//!
//! The engine never holds funds. It asks a [`TransferProvider`] how much a
//! treasury has delegated to it and instructs the provider to move value
//! from the treasury under that delegation.
//!
//! Execution always goes through [`TransferProvider::move_funds_batch`]:
//! the net leg and the fee leg either both land or neither does.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spend_policy::{AccountId, Amount};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Provider-side failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Treasury delegated less than requested
    #[error("allowance {granted} below requested {requested}")]
    InsufficientAllowance {
        /// Requested total
        requested: Amount,
        /// Allowance granted to the spender
        granted: Amount,
    },

    /// Treasury balance below requested
    #[error("balance {available} below requested {requested}")]
    InsufficientBalance {
        /// Requested total
        requested: Amount,
        /// Treasury balance
        available: Amount,
    },

    /// Provider refused the transfer
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// Provider unreachable
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// No answer within the engine's transfer timeout; outcome unknown
    #[error("transfer timed out after {after_ms} ms, outcome unknown")]
    TimedOut {
        /// Elapsed bound in milliseconds
        after_ms: u64,
    },

    /// The executing call was dropped before the provider answered
    #[error("execution cancelled before the transfer resolved, outcome unknown")]
    Cancelled,
}

impl TransferError {
    /// True when the provider may have applied the transfer anyway
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, TransferError::TimedOut { .. } | TransferError::Cancelled)
    }
}

/// One leg of a multi-leg transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    /// Credited account
    pub to: AccountId,
    /// Amount moved
    pub amount: Amount,
}

/// Custody backend the engine delegates value movement to
///
/// The engine bounds every call with its transfer timeout and drops the
/// provider future when the timeout fires or the executing call is
/// cancelled. Either way the record is settled as `Failed`, the receipt is
/// released for retry and the error is [`TransferError::is_indeterminate`].
/// A provider whose transfers can still land after the future is dropped
/// must reconcile those records (the failed record's `receipt_fingerprint`
/// identifies the instruction) or make `move_funds_batch` idempotent per
/// receipt, otherwise a retry can pay twice.
#[async_trait]
pub trait TransferProvider: Send + Sync {
    /// Amount `treasury` currently allows `spender` to move
    async fn allowance(
        &self,
        treasury: &AccountId,
        spender: &AccountId,
    ) -> Result<Amount, TransferError>;

    /// Move `amount` from `from` to `to` under the engine's allowance
    async fn move_funds(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Move every leg from `from`, all-or-nothing
    ///
    /// Implementations must not leave a subset of legs applied when
    /// returning an error.
    async fn move_funds_batch(
        &self,
        from: &AccountId,
        legs: &[TransferLeg],
    ) -> Result<(), TransferError>;
}

/// Completed transfer, as recorded by [`InMemoryTransferProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTransfer {
    /// Debited account
    pub from: AccountId,
    /// Credited account
    pub to: AccountId,
    /// Amount moved
    pub amount: Amount,
}

#[derive(Debug, Default)]
struct Books {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<(AccountId, AccountId), Amount>,
    rejected_recipients: HashSet<AccountId>,
    failures_pending: u32,
    completed: Vec<CompletedTransfer>,
}

/// Balance and allowance book kept in memory
///
/// Serves a single spender (the engine account). Moving funds consumes the
/// spender's allowance, like a token `transferFrom`. Failures can be
/// injected for tests and drills.
#[derive(Debug)]
pub struct InMemoryTransferProvider {
    spender: AccountId,
    books: Mutex<Books>,
}

impl InMemoryTransferProvider {
    /// Provider acting for `spender`
    pub fn new(spender: AccountId) -> Self {
        Self {
            spender,
            books: Mutex::new(Books::default()),
        }
    }

    /// Credit an account
    pub fn deposit(&self, account: &AccountId, amount: Amount) {
        let mut books = self.books.lock();
        let balance = books.balances.entry(account.clone()).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Set the allowance `owner` grants `spender`
    pub fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Amount) {
        self.books
            .lock()
            .allowances
            .insert((owner.clone(), spender.clone()), amount);
    }

    /// Current balance
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.books
            .lock()
            .balances
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    /// Fail the next `count` move calls
    pub fn fail_next(&self, count: u32) {
        self.books.lock().failures_pending = count;
    }

    /// Reject every transfer crediting `account`
    pub fn reject_recipient(&self, account: &AccountId) {
        self.books.lock().rejected_recipients.insert(account.clone());
    }

    /// Stop rejecting transfers to `account`
    pub fn accept_recipient(&self, account: &AccountId) {
        self.books.lock().rejected_recipients.remove(account);
    }

    /// Transfers applied so far, in order
    pub fn completed(&self) -> Vec<CompletedTransfer> {
        self.books.lock().completed.clone()
    }

    fn apply(&self, from: &AccountId, legs: &[TransferLeg]) -> Result<(), TransferError> {
        let mut books = self.books.lock();

        if books.failures_pending > 0 {
            books.failures_pending -= 1;
            return Err(TransferError::Unavailable("injected failure".to_string()));
        }
        if let Some(leg) = legs.iter().find(|l| books.rejected_recipients.contains(&l.to)) {
            return Err(TransferError::Rejected(format!(
                "recipient {} refused",
                leg.to
            )));
        }

        let total = legs
            .iter()
            .try_fold(Amount::ZERO, |acc, leg| acc.checked_add(leg.amount))
            .ok_or_else(|| TransferError::Rejected("total overflows".to_string()))?;

        let allowance_key = (from.clone(), self.spender.clone());
        let granted = books.allowances.get(&allowance_key).copied().unwrap_or_default();
        if granted < total {
            return Err(TransferError::InsufficientAllowance {
                requested: total,
                granted,
            });
        }
        let available = books.balances.get(from).copied().unwrap_or_default();
        if available < total {
            return Err(TransferError::InsufficientBalance {
                requested: total,
                available,
            });
        }

        // All checks passed; nothing below can fail.
        books.allowances.insert(allowance_key, granted.saturating_sub(total));
        books.balances.insert(from.clone(), available.saturating_sub(total));
        for leg in legs {
            let balance = books.balances.entry(leg.to.clone()).or_default();
            *balance = balance.saturating_add(leg.amount);
            books.completed.push(CompletedTransfer {
                from: from.clone(),
                to: leg.to.clone(),
                amount: leg.amount,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransferProvider for InMemoryTransferProvider {
    async fn allowance(
        &self,
        treasury: &AccountId,
        spender: &AccountId,
    ) -> Result<Amount, TransferError> {
        Ok(self
            .books
            .lock()
            .allowances
            .get(&(treasury.clone(), spender.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn move_funds(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.apply(
            from,
            &[TransferLeg {
                to: to.clone(),
                amount,
            }],
        )
    }

    async fn move_funds_batch(
        &self,
        from: &AccountId,
        legs: &[TransferLeg],
    ) -> Result<(), TransferError> {
        self.apply(from, legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AccountId {
        AccountId::new("engine")
    }

    fn funded(units: u64, allowance: u64) -> (InMemoryTransferProvider, AccountId) {
        let provider = InMemoryTransferProvider::new(engine());
        let treasury = AccountId::new("treasury");
        provider.deposit(&treasury, Amount::from_units(units));
        provider.approve(&treasury, &engine(), Amount::from_units(allowance));
        (provider, treasury)
    }

    #[tokio::test]
    async fn test_move_consumes_allowance() {
        let (provider, treasury) = funded(1_000, 500);
        let alice = AccountId::new("alice");

        provider
            .move_funds(&treasury, &alice, Amount::from_units(200))
            .await
            .unwrap();

        assert_eq!(provider.balance_of(&alice), Amount::from_units(200));
        assert_eq!(provider.balance_of(&treasury), Amount::from_units(800));
        assert_eq!(
            provider.allowance(&treasury, &engine()).await.unwrap(),
            Amount::from_units(300)
        );
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let (provider, treasury) = funded(1_000, 1_000);
        let alice = AccountId::new("alice");
        let fees = AccountId::new("fees");
        provider.reject_recipient(&fees);

        let legs = vec![
            TransferLeg {
                to: alice.clone(),
                amount: Amount::from_units(98),
            },
            TransferLeg {
                to: fees.clone(),
                amount: Amount::from_units(2),
            },
        ];
        let err = provider.move_funds_batch(&treasury, &legs).await.unwrap_err();
        assert!(matches!(err, TransferError::Rejected(_)));
        assert_eq!(provider.balance_of(&alice), Amount::ZERO);
        assert_eq!(provider.balance_of(&treasury), Amount::from_units(1_000));
        assert!(provider.completed().is_empty());

        provider.accept_recipient(&fees);
        provider.move_funds_batch(&treasury, &legs).await.unwrap();
        assert_eq!(provider.balance_of(&fees), Amount::from_units(2));
        assert_eq!(provider.completed().len(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_allowance_and_balance() {
        let (provider, treasury) = funded(50, 100);
        let alice = AccountId::new("alice");

        let err = provider
            .move_funds(&treasury, &alice, Amount::from_units(60))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { .. }));

        let err = provider
            .move_funds(&treasury, &alice, Amount::from_units(101))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientAllowance { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (provider, treasury) = funded(100, 100);
        let alice = AccountId::new("alice");
        provider.fail_next(1);

        assert!(provider
            .move_funds(&treasury, &alice, Amount::from_units(1))
            .await
            .is_err());
        assert!(provider
            .move_funds(&treasury, &alice, Amount::from_units(1))
            .await
            .is_ok());
    }

    #[test]
    fn test_indeterminate_outcomes() {
        assert!(TransferError::TimedOut { after_ms: 50 }.is_indeterminate());
        assert!(TransferError::Cancelled.is_indeterminate());
        assert!(!TransferError::Unavailable("down".to_string()).is_indeterminate());
        assert!(!TransferError::Rejected("no".to_string()).is_indeterminate());
        assert!(TransferError::TimedOut { after_ms: 50 }
            .to_string()
            .contains("timed out"));
    }
}
