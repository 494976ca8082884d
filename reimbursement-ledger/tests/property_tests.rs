//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Idempotency: a processed receipt is rejected and changes nothing
//! - Rollback symmetry: a failed transfer leaves limits and marks as before
//! - Fee conservation: net + fee == gross, fee within the 2% ceiling
//! - Limit monotonicity: executed volume in one day never exceeds the cap

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use reimbursement_ledger::{
    AccountId, Amount, CompanyId, Config, Error, Fingerprint, InMemoryTransferProvider,
    RecordStatus, ReimbursementEngine, Role, WalletKind,
};
use spend_policy::{ManualClock, DAY_SECONDS};
use std::sync::Arc;

fn admin() -> AccountId {
    AccountId::new("admin")
}

fn ops() -> AccountId {
    AccountId::new("ops")
}

fn acme() -> CompanyId {
    CompanyId::new("acme")
}

fn treasury() -> AccountId {
    AccountId::new("treasury")
}

fn alice() -> AccountId {
    AccountId::new("alice")
}

fn receipt(n: usize) -> Fingerprint {
    Fingerprint::digest(format!("receipt-{}", n))
}

/// Strategy for amounts between 0.000001 and 400 units
fn amount_strategy() -> impl Strategy<Value = Amount> {
    (1u128..=400_000_000u128).prop_map(Amount::from_micros)
}

async fn create_test_engine() -> (ReimbursementEngine, Arc<InMemoryTransferProvider>) {
    let config = Config::default();
    let provider = Arc::new(InMemoryTransferProvider::new(config.engine_account()));
    let engine = ReimbursementEngine::new(&config, provider.clone())
        .unwrap()
        .with_clock(Arc::new(ManualClock::starting_at(500 * DAY_SECONDS + 60)));

    engine
        .grant_role(&admin(), Role::Operator, &ops())
        .await
        .unwrap();
    engine
        .register_company(&admin(), acme(), treasury(), WalletKind::Eoa, None)
        .await
        .unwrap();
    provider.deposit(&treasury(), Amount::from_units(1_000_000));
    provider.approve(&treasury(), engine.engine_account(), Amount::from_units(1_000_000));

    (engine, provider)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: re-executing a processed receipt fails and changes nothing
    #[test]
    fn prop_duplicate_receipt_is_inert(
        amounts in prop::collection::vec(amount_strategy(), 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, provider) = create_test_engine().await;

            let mut executed = Vec::new();
            for (i, amount) in amounts.iter().enumerate() {
                if engine
                    .execute(&ops(), &acme(), &alice(), *amount, receipt(i), receipt(1_000 + i))
                    .await
                    .is_ok()
                {
                    executed.push(i);
                }
            }
            prop_assume!(!executed.is_empty());
            let replayed = executed[pick.index(executed.len())];

            let records_before = engine.record_count();
            let daily_before = engine.remaining_daily_allowance(&acme(), &alice());
            let balance_before = provider.balance_of(&alice());
            let events_before = engine.audit_events(0).len();

            let err = engine
                .execute(&ops(), &acme(), &alice(), amounts[replayed], receipt(replayed), receipt(7))
                .await
                .unwrap_err();
            prop_assert!(matches!(err, Error::DuplicateReceipt(_)));

            prop_assert_eq!(engine.record_count(), records_before);
            prop_assert_eq!(engine.remaining_daily_allowance(&acme(), &alice()), daily_before);
            prop_assert_eq!(provider.balance_of(&alice()), balance_before);
            prop_assert_eq!(engine.audit_events(0).len(), events_before);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: a failed transfer restores limits and the receipt mark
    #[test]
    fn prop_failed_transfer_rolls_back(
        prior in prop::option::of(amount_strategy()),
        amount in amount_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, provider) = create_test_engine().await;
            if let Some(prior) = prior {
                engine
                    .execute(&ops(), &acme(), &alice(), prior, receipt(0), receipt(0))
                    .await
                    .unwrap();
            }

            let limits_before = engine.recipient_limits(&acme(), &alice());
            let treasury_before = provider.balance_of(&treasury());
            provider.fail_next(1);

            let record_id = engine
                .execute(&ops(), &acme(), &alice(), amount, receipt(1), receipt(1))
                .await
                .unwrap();
            let record = engine.record(record_id).unwrap();
            prop_assert_eq!(record.status, RecordStatus::Failed);
            prop_assert!(record.failure_reason.is_some());

            let limits_after = engine.recipient_limits(&acme(), &alice());
            prop_assert_eq!(
                limits_after.as_ref().map(|l| (l.daily_spent, l.monthly_spent)),
                limits_before
                    .as_ref()
                    .map(|l| (l.daily_spent, l.monthly_spent))
                    .or(Some((Amount::ZERO, Amount::ZERO)))
            );
            prop_assert!(!engine.is_receipt_processed(&receipt(1)));
            prop_assert_eq!(provider.balance_of(&treasury()), treasury_before);

            // Same receipt can be retried
            let retry = engine
                .execute(&ops(), &acme(), &alice(), amount, receipt(1), receipt(1))
                .await
                .unwrap();
            prop_assert_eq!(engine.record(retry).unwrap().status, RecordStatus::Executed);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: the fee never exceeds the ceiling and legs sum to gross
    #[test]
    fn prop_fee_split_conserves_value(
        amount in amount_strategy(),
        fee_bps in 0u16..=200,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, provider) = create_test_engine().await;
            let fees = AccountId::new("fees");
            engine
                .update_fee_config(&admin(), fee_bps, Some(fees.clone()))
                .await
                .unwrap();

            let record_id = engine
                .execute(&ops(), &acme(), &alice(), amount, receipt(1), receipt(1))
                .await
                .unwrap();
            let record = engine.record(record_id).unwrap();

            prop_assert_eq!(record.fee.checked_add(record.net_amount), Some(amount));
            prop_assert!(record.fee.micros() * 10_000 <= amount.micros() * 200);
            prop_assert_eq!(provider.balance_of(&alice()), record.net_amount);
            prop_assert_eq!(provider.balance_of(&fees), record.fee);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: executed volume within a day never exceeds the daily cap
    #[test]
    fn prop_daily_cap_holds(amounts in prop::collection::vec(amount_strategy(), 1..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _provider) = create_test_engine().await;
            let cap = engine.default_limits().daily;
            let mut total = Amount::ZERO;

            for (i, amount) in amounts.into_iter().enumerate() {
                let before = engine.remaining_daily_allowance(&acme(), &alice());
                match engine
                    .execute(&ops(), &acme(), &alice(), amount, receipt(i), receipt(i))
                    .await
                {
                    Ok(_) => total = total.checked_add(amount).unwrap(),
                    Err(Error::ExceedsDaily { remaining, .. }) => {
                        prop_assert_eq!(remaining, before);
                        prop_assert_eq!(engine.remaining_daily_allowance(&acme(), &alice()), before);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
            }

            prop_assert!(total <= cap);
            prop_assert_eq!(
                engine.remaining_daily_allowance(&acme(), &alice()),
                cap.checked_sub(total).unwrap()
            );
            Ok::<(), TestCaseError>(())
        })?;
    }
}
