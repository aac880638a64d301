use std::sync::Arc;

use chrono::{Duration, Utc};

use super::restore::restore_and_delete;
use super::snapshot::{FreezeRequest, snapshot_and_zero};
use super::*;
use crate::account::{Account, AccountStatus, NewAccount, NewProject, Project, ProjectId};
use crate::config::FreezeConfig;
use crate::limits::{ProjectLimitsUpdate, ProjectSnapshot, RateLimits, UsageLimits};
use crate::store::{Cancellation, DbTx, FreezeDb, SqliteStore, StoreError};
use crate::tracker::NoopTracker;

const OWNER_LIMITS: UsageLimits = UsageLimits::new(1000, 2000, 30);
const PROJECT_LIMITS: UsageLimits = UsageLimits::new(500, 500, 10);

struct Fixture {
    store: SqliteStore,
    account: Account,
    project: Project,
}

fn fixture() -> Fixture {
    let store = SqliteStore::in_memory().unwrap();
    let account = store
        .create_account(&NewAccount::active("user@example.com", OWNER_LIMITS))
        .unwrap();
    let project = store
        .create_project(
            &NewProject::new(account.id, "photos", PROJECT_LIMITS)
                .with_rate(RateLimits::new(Some(100), Some(100))),
        )
        .unwrap();
    Fixture {
        store,
        account,
        project,
    }
}

fn service(store: &SqliteStore) -> AccountFreezeService<SqliteStore> {
    AccountFreezeService::new(
        store.clone(),
        Arc::new(NoopTracker),
        FreezeConfig::default(),
    )
}

fn in_tx<T>(
    store: &SqliteStore,
    f: impl FnOnce(&dyn DbTx) -> Result<T, FreezeError>,
) -> Result<T, FreezeError> {
    store.with_tx(&Cancellation::new(), f)
}

fn request(account: &Account, freeze_type: FreezeType) -> FreezeRequest<'_> {
    FreezeRequest {
        account,
        freeze_type,
        existing: None,
        inherited: None,
        days_till_escalation: None,
        zero_rate_limits: freeze_type.policy().zeroes_rate_limits,
        now: Utc::now(),
    }
}

#[test]
fn snapshot_captures_then_zeroes() {
    let f = fixture();
    let event = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(tx, &request(&f.account, FreezeType::LegalFreeze))?)
    })
    .unwrap();

    let limits = event.limits.unwrap();
    assert_eq!(limits.user, OWNER_LIMITS);
    let entry = limits.projects[&f.project.id];
    assert_eq!(entry.usage, PROJECT_LIMITS);
    assert_eq!(entry.rate_limit, Some(100));
    assert_eq!(entry.burst_limit, Some(100));
    assert!(entry.rate_limits_zeroed);

    assert!(f.store.account(f.account.id).unwrap().owner_limits.is_zero());
    let project = f.store.project(f.project.id).unwrap();
    assert!(project.usage.is_zero());
    assert_eq!(project.rate, RateLimits::ZERO);
}

#[test]
fn snapshot_of_zeroed_account_keeps_first_capture() {
    let f = fixture();
    let first = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(tx, &request(&f.account, FreezeType::BillingFreeze))?)
    })
    .unwrap();

    // Re-read so the request sees the zeroed owner limits.
    let account = f.store.account(f.account.id).unwrap();
    let second = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(
            tx,
            &FreezeRequest {
                existing: Some(&first),
                ..request(&account, FreezeType::BillingFreeze)
            },
        )?)
    })
    .unwrap();

    assert_eq!(second.limits, first.limits);
    assert_eq!(second.created_at, first.created_at);
}

#[test]
fn snapshot_reuses_inherited_project_entry() {
    let f = fixture();
    let billing = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(tx, &request(&f.account, FreezeType::BillingFreeze))?)
    })
    .unwrap();

    let account = f.store.account(f.account.id).unwrap();
    let violation = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(
            tx,
            &FreezeRequest {
                inherited: billing.limits.as_ref(),
                ..request(&account, FreezeType::ViolationFreeze)
            },
        )?)
    })
    .unwrap();

    let limits = violation.limits.unwrap();
    assert_eq!(limits.user, OWNER_LIMITS);
    assert_eq!(limits.projects[&f.project.id].usage, PROJECT_LIMITS);
}

#[test]
fn restore_requires_snapshot() {
    let f = fixture();
    let event = FreezeEvent::new(f.account.id, FreezeType::BillingFreeze, None, Utc::now());
    let err = in_tx(&f.store, |tx| {
        restore_and_delete(tx, &f.account, &event, Utc::now())
    })
    .unwrap_err();
    assert!(matches!(err, FreezeError::MissingSnapshot { .. }));
}

#[test]
fn restore_skips_deleted_projects() {
    let f = fixture();
    let mut event = in_tx(&f.store, |tx| {
        Ok(snapshot_and_zero(tx, &request(&f.account, FreezeType::BillingFreeze))?)
    })
    .unwrap();
    event.limits.as_mut().unwrap().projects.insert(
        ProjectId::new_v4(),
        ProjectSnapshot {
            usage: UsageLimits::new(1, 1, 1),
            ..ProjectSnapshot::default()
        },
    );

    let status = in_tx(&f.store, |tx| {
        restore_and_delete(tx, &f.account, &event, Utc::now())
    })
    .unwrap();
    assert_eq!(status, AccountStatus::Active);
    assert_eq!(f.store.project(f.project.id).unwrap().usage, PROJECT_LIMITS);
    assert_eq!(
        f.store.account(f.account.id).unwrap().owner_limits,
        OWNER_LIMITS
    );
}

#[test]
fn restore_keeps_status_held_by_another_type() {
    let f = fixture();
    let service = service(&f.store);
    service.billing_freeze_user(f.account.id).unwrap();
    service.legal_freeze_user(f.account.id).unwrap();
    service.bot_freeze_user(f.account.id).unwrap();

    // Legal does not hold PendingBotVerification, so the status stays.
    service.legal_unfreeze_user(f.account.id).unwrap();
    assert_eq!(
        f.store.account(f.account.id).unwrap().status,
        AccountStatus::PendingBotVerification
    );

    assert_eq!(
        f.store.account(f.account.id).unwrap().owner_limits,
        OWNER_LIMITS
    );

    // The bot freeze captured zeroed limits and must not write them back.
    service.bot_unfreeze_user(f.account.id).unwrap();
    let account = f.store.account(f.account.id).unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.owner_limits, OWNER_LIMITS);
    assert_eq!(f.store.project(f.project.id).unwrap().usage, PROJECT_LIMITS);
}

#[test]
fn blocked_freeze_reports_operation_and_blocking_type() {
    let f = fixture();
    let service = service(&f.store);
    service.legal_freeze_user(f.account.id).unwrap();

    let err = service.billing_freeze_user(f.account.id).unwrap_err();
    assert!(err.is_policy_violation());
    assert_eq!(
        err.operation(),
        Some(Operation::Freeze(FreezeType::BillingFreeze))
    );
    assert!(matches!(
        err.root(),
        FreezeError::Blocked {
            blocking: FreezeType::LegalFreeze,
            ..
        }
    ));
}

#[test]
fn unfreeze_without_event_is_no_freeze_status() {
    let f = fixture();
    let service = service(&f.store);
    for freeze_type in FreezeType::ALL {
        let err = service.unfreeze(f.account.id, freeze_type).unwrap_err();
        assert!(err.is_no_freeze_status(), "{freeze_type}: {err}");
        assert!(err.is_client_error());
    }
}

#[test]
fn unknown_account_is_not_found() {
    let f = fixture();
    let err = service(&f.store)
        .billing_freeze_user(crate::account::AccountId::new_v4())
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::NotFound);
    assert!(matches!(
        err.root(),
        FreezeError::Store(StoreError::AccountNotFound(_))
    ));
}

#[test]
fn cancelled_service_changes_nothing() {
    let f = fixture();
    let cancel = Cancellation::new();
    let service = service(&f.store).with_cancellation(cancel.clone());
    cancel.cancel();

    let err = service.billing_freeze_user(f.account.id).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(
        f.store.account(f.account.id).unwrap().owner_limits,
        OWNER_LIMITS
    );
    assert!(service.get_all(f.account.id).unwrap_err().is_cancelled());
}

#[test]
fn delayed_bot_freeze_rejects_negative_days() {
    let f = fixture();
    let err = service(&f.store)
        .delayed_bot_freeze_user(f.account.id, Some(-1))
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::Validation);
}

#[test]
fn delayed_bot_freeze_does_not_touch_limits() {
    let f = fixture();
    let event = service(&f.store)
        .delayed_bot_freeze_user(f.account.id, Some(3))
        .unwrap();
    assert_eq!(event.days_till_escalation, Some(3));
    assert_eq!(event.limits, None);
    assert_eq!(
        f.store.account(f.account.id).unwrap().owner_limits,
        OWNER_LIMITS
    );
}

#[test]
fn escalation_countdown() {
    let now = Utc::now();
    let mut event = FreezeEvent::new(
        crate::account::AccountId::new_v4(),
        FreezeType::BillingFreeze,
        Some(60),
        now - Duration::days(10),
    );
    assert_eq!(days_till_escalation(&event, now), Some(50));
    assert!(!should_escalate(&event, now));

    event.created_at = now - Duration::days(60);
    assert_eq!(days_till_escalation(&event, now), Some(0));
    assert!(!should_escalate(&event, now));

    event.created_at = now - Duration::days(61);
    assert_eq!(days_till_escalation(&event, now), Some(-1));
    assert!(should_escalate(&event, now));

    event.days_till_escalation = None;
    assert_eq!(days_till_escalation(&event, now), None);
    assert!(!should_escalate(&event, now));
}

#[test]
fn escalate_billing_freeze_clears_countdown() {
    let f = fixture();
    let service = service(&f.store);
    let event = service.billing_freeze_user(f.account.id).unwrap();
    assert_eq!(event.days_till_escalation, Some(60));

    service
        .escalate_billing_freeze(f.account.id, &event)
        .unwrap();
    let stored = service
        .get(f.account.id, FreezeType::BillingFreeze)
        .unwrap()
        .unwrap();
    assert_eq!(stored.days_till_escalation, None);
    assert_eq!(stored.limits, event.limits);
    assert_eq!(
        f.store.account(f.account.id).unwrap().status,
        AccountStatus::PendingDeletion
    );

    // Unfreezing reverts the escalated status.
    service.billing_unfreeze_user(f.account.id).unwrap();
    assert_eq!(
        f.store.account(f.account.id).unwrap().status,
        AccountStatus::Active
    );
}

#[test]
fn escalate_requires_existing_event() {
    let f = fixture();
    let service = service(&f.store);
    let event = service.billing_freeze_user(f.account.id).unwrap();
    service.billing_unfreeze_user(f.account.id).unwrap();

    let err = service
        .escalate_billing_freeze(f.account.id, &event)
        .unwrap_err();
    assert!(err.is_no_freeze_status());
    assert_eq!(
        f.store.account(f.account.id).unwrap().status,
        AccountStatus::Active
    );
}

#[test]
fn escalate_rejects_other_types() {
    let f = fixture();
    let service = service(&f.store);
    let warning = service.billing_warn_user(f.account.id).unwrap();
    let err = service
        .escalate_billing_freeze(f.account.id, &warning)
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::Validation);

    let trial = service.trial_expiration_freeze_user(f.account.id);
    assert!(trial.is_ok());
    let err = service.escalate(f.account.id, &trial.unwrap()).unwrap_err();
    assert!(matches!(err.root(), FreezeError::NotEscalatable { .. }));
}

#[test]
fn escalating_a_warning_applies_billing_freeze() {
    let f = fixture();
    let service = service(&f.store);
    let warning = service.billing_warn_user(f.account.id).unwrap();

    service.escalate(f.account.id, &warning).unwrap();
    let events = service.get_all(f.account.id).unwrap();
    assert!(events.contains(FreezeType::BillingFreeze));
    assert!(!events.contains(FreezeType::BillingWarning));
}

#[test]
fn zero_page_limit_is_rejected() {
    let f = fixture();
    let err = service(&f.store)
        .get_all_events(&FreezeEventsCursor::first(0), &[])
        .unwrap_err();
    assert_eq!(err.error_class(), ErrorClass::Validation);
}

#[test]
fn billing_freeze_leaves_rate_limits_alone() {
    let f = fixture();
    f.store
        .set_project_limits(
            f.project.id,
            &ProjectLimitsUpdate {
                usage: PROJECT_LIMITS,
                user_set_storage: None,
                user_set_bandwidth: None,
                rate: Some(RateLimits::new(Some(7), None)),
            },
        )
        .unwrap();

    let service = service(&f.store);
    service.billing_freeze_user(f.account.id).unwrap();
    assert_eq!(
        f.store.project(f.project.id).unwrap().rate,
        RateLimits::new(Some(7), None)
    );
    service.billing_unfreeze_user(f.account.id).unwrap();
    assert_eq!(
        f.store.project(f.project.id).unwrap().rate,
        RateLimits::new(Some(7), None)
    );
}
