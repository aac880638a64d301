//! Property-based tests for snapshot restorability.
//!
//! Live limits are drawn from the positive range; explicit zero ceilings
//! set by operators are indistinguishable from the suspension sentinel.

use std::sync::Arc;

use proptest::prelude::*;

use super::{AccountFreezeService, FreezeType};
use crate::account::{AccountId, NewAccount, NewProject, Project};
use crate::config::FreezeConfig;
use crate::limits::{ProjectLimitsUpdate, RateLimits, UsageLimits};
use crate::store::SqliteStore;
use crate::tracker::NoopTracker;

const ENFORCING: [FreezeType; 5] = [
    FreezeType::BillingFreeze,
    FreezeType::ViolationFreeze,
    FreezeType::LegalFreeze,
    FreezeType::BotFreeze,
    FreezeType::TrialExpirationFreeze,
];

fn ceiling() -> impl Strategy<Value = i64> {
    1i64..1_000_000_000_000
}

fn usage_strategy() -> impl Strategy<Value = UsageLimits> {
    (ceiling(), ceiling(), 1i64..100_000)
        .prop_map(|(storage, bandwidth, segment)| UsageLimits::new(storage, bandwidth, segment))
}

fn rate_strategy() -> impl Strategy<Value = RateLimits> {
    (
        proptest::option::of(1i64..10_000),
        proptest::option::of(1i64..10_000),
    )
        .prop_map(|(rate, burst)| RateLimits::new(rate, burst))
}

type ProjectSpec = (UsageLimits, Option<i64>, Option<i64>, RateLimits);

fn project_strategy() -> impl Strategy<Value = ProjectSpec> {
    (
        usage_strategy(),
        proptest::option::of(ceiling()),
        proptest::option::of(ceiling()),
        rate_strategy(),
    )
}

fn enforcing_type() -> impl Strategy<Value = FreezeType> {
    prop::sample::select(ENFORCING.to_vec())
}

struct Seeded {
    store: SqliteStore,
    service: AccountFreezeService<SqliteStore>,
    account_id: AccountId,
    projects: Vec<Project>,
    owner_limits: UsageLimits,
}

fn seed(owner_limits: UsageLimits, specs: &[ProjectSpec]) -> Seeded {
    let store = SqliteStore::in_memory().unwrap();
    let account = store
        .create_account(&NewAccount::active("prop@example.com", owner_limits))
        .unwrap();
    let projects = specs
        .iter()
        .enumerate()
        .map(|(i, (usage, user_storage, user_bandwidth, rate))| {
            let project = store
                .create_project(
                    &NewProject::new(account.id, format!("p{i}"), *usage).with_rate(*rate),
                )
                .unwrap();
            store
                .set_project_limits(
                    project.id,
                    &ProjectLimitsUpdate {
                        usage: *usage,
                        user_set_storage: *user_storage,
                        user_set_bandwidth: *user_bandwidth,
                        rate: None,
                    },
                )
                .unwrap();
            store.project(project.id).unwrap()
        })
        .collect();
    let service = AccountFreezeService::new(
        store.clone(),
        Arc::new(NoopTracker),
        FreezeConfig::default(),
    );
    Seeded {
        store,
        service,
        account_id: account.id,
        projects,
        owner_limits,
    }
}

impl Seeded {
    fn assert_restored(&self) -> Result<(), TestCaseError> {
        let account = self.store.account(self.account_id).unwrap();
        prop_assert_eq!(account.owner_limits, self.owner_limits);
        for before in &self.projects {
            let after = self.store.project(before.id).unwrap();
            prop_assert_eq!(&after, before);
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: freeze then matching unfreeze restores every live value.
    #[test]
    fn prop_freeze_round_trip(
        owner in usage_strategy(),
        projects in prop::collection::vec(project_strategy(), 0..4),
        freeze_type in enforcing_type(),
    ) {
        let seeded = seed(owner, &projects);
        seeded.service.freeze(seeded.account_id, freeze_type).unwrap();
        seeded.service.unfreeze(seeded.account_id, freeze_type).unwrap();
        seeded.assert_restored()?;
    }

    /// Property: re-applying the same freeze never loses the first snapshot.
    #[test]
    fn prop_repeated_freeze_is_idempotent(
        owner in usage_strategy(),
        projects in prop::collection::vec(project_strategy(), 1..4),
        freeze_type in prop::sample::select(vec![
            FreezeType::BillingFreeze,
            FreezeType::ViolationFreeze,
            FreezeType::LegalFreeze,
            FreezeType::TrialExpirationFreeze,
        ]),
        repeats in 2usize..5,
    ) {
        let seeded = seed(owner, &projects);
        for _ in 0..repeats {
            seeded.service.freeze(seeded.account_id, freeze_type).unwrap();
        }
        let events = seeded.service.get_all(seeded.account_id).unwrap();
        prop_assert_eq!(events.iter().count(), 1);
        seeded.service.unfreeze(seeded.account_id, freeze_type).unwrap();
        seeded.assert_restored()?;
    }

    /// Property: a stronger freeze stacked on a billing or trial freeze
    /// inherits its snapshot, so lifting the stronger freeze restores the
    /// values from before the first freeze.
    #[test]
    fn prop_stacked_freeze_restores_original(
        owner in usage_strategy(),
        projects in prop::collection::vec(project_strategy(), 0..4),
        first in prop::sample::select(vec![
            FreezeType::BillingFreeze,
            FreezeType::TrialExpirationFreeze,
        ]),
        second in prop::sample::select(vec![
            FreezeType::ViolationFreeze,
            FreezeType::LegalFreeze,
            FreezeType::BotFreeze,
        ]),
        warned in any::<bool>(),
    ) {
        let seeded = seed(owner, &projects);
        if warned {
            seeded.service.billing_warn_user(seeded.account_id).unwrap();
        }
        seeded.service.freeze(seeded.account_id, first).unwrap();
        seeded.service.freeze(seeded.account_id, second).unwrap();

        let events = seeded.service.get_all(seeded.account_id).unwrap();
        prop_assert!(!events.contains(first));
        prop_assert!(events.contains(second));

        seeded.service.unfreeze(seeded.account_id, second).unwrap();
        seeded.assert_restored()?;
    }

    /// Property: a stronger freeze on top of a billing freeze that itself
    /// landed on a trial freeze loses no snapshot; once every remaining
    /// event is lifted the original values are back.
    #[test]
    fn prop_three_layer_stack_restores_original(
        owner in usage_strategy(),
        projects in prop::collection::vec(project_strategy(), 0..4),
        top in prop::sample::select(vec![
            FreezeType::ViolationFreeze,
            FreezeType::LegalFreeze,
            FreezeType::BotFreeze,
        ]),
    ) {
        let seeded = seed(owner, &projects);
        seeded.service.trial_expiration_freeze_user(seeded.account_id).unwrap();
        seeded.service.billing_freeze_user(seeded.account_id).unwrap();
        seeded.service.freeze(seeded.account_id, top).unwrap();

        let events = seeded.service.get_all(seeded.account_id).unwrap();
        prop_assert!(!events.contains(FreezeType::BillingFreeze));
        prop_assert_eq!(
            events.contains(FreezeType::TrialExpirationFreeze),
            top != FreezeType::BotFreeze
        );

        seeded.service.unfreeze(seeded.account_id, top).unwrap();
        if events.contains(FreezeType::TrialExpirationFreeze) {
            seeded
                .service
                .trial_expiration_unfreeze_user(seeded.account_id)
                .unwrap();
        }
        prop_assert!(seeded.service.get_all(seeded.account_id).unwrap().is_empty());
        seeded.assert_restored()?;
    }
}
