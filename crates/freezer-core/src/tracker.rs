//! Outbound notifications about freeze state changes.
//!
//! The service calls a [`FreezeTracker`] only after the unit of work has
//! committed, so a tracker never reports a change that was rolled back.

use tracing::info;

use crate::account::AccountId;
use crate::freeze::FreezeType;

/// Receives freeze state changes for analytics or notification delivery.
pub trait FreezeTracker: Send + Sync {
    /// An account was frozen.
    fn track_account_frozen(&self, account_id: AccountId, email: &str, freeze_type: FreezeType);

    /// A freeze was lifted.
    fn track_account_unfrozen(&self, account_id: AccountId, email: &str, freeze_type: FreezeType);

    /// An account was warned (billing warning or scheduled bot review).
    fn track_account_freeze_warning(
        &self,
        account_id: AccountId,
        email: &str,
        freeze_type: FreezeType,
    );

    /// A warning was lifted.
    fn track_account_unwarned(&self, account_id: AccountId, email: &str, freeze_type: FreezeType);
}

/// Tracker that emits structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracker;

impl FreezeTracker for LogTracker {
    fn track_account_frozen(&self, account_id: AccountId, email: &str, freeze_type: FreezeType) {
        info!(%account_id, email, %freeze_type, "account frozen");
    }

    fn track_account_unfrozen(&self, account_id: AccountId, email: &str, freeze_type: FreezeType) {
        info!(%account_id, email, %freeze_type, "account unfrozen");
    }

    fn track_account_freeze_warning(
        &self,
        account_id: AccountId,
        email: &str,
        freeze_type: FreezeType,
    ) {
        info!(%account_id, email, %freeze_type, "account freeze warning");
    }

    fn track_account_unwarned(&self, account_id: AccountId, email: &str, freeze_type: FreezeType) {
        info!(%account_id, email, %freeze_type, "account unwarned");
    }
}

/// Tracker that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl FreezeTracker for NoopTracker {
    fn track_account_frozen(&self, _: AccountId, _: &str, _: FreezeType) {}

    fn track_account_unfrozen(&self, _: AccountId, _: &str, _: FreezeType) {}

    fn track_account_freeze_warning(&self, _: AccountId, _: &str, _: FreezeType) {}

    fn track_account_unwarned(&self, _: AccountId, _: &str, _: FreezeType) {}
}
