//! Capture-then-zero.
//!
//! The all-zero sentinel decides whether a live value is captured: a zero
//! ceiling was put there by an earlier freeze, so the earlier snapshot is the
//! one worth keeping.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{FreezeEvent, FreezeType};
use crate::account::Account;
use crate::limits::{FreezeEventLimits, ProjectLimitsUpdate, ProjectSnapshot, UsageLimits};
use crate::store::{DbTx, StoreError};

/// Input to [`snapshot_and_zero`].
#[derive(Debug, Clone, Copy)]
pub struct FreezeRequest<'a> {
    /// The account, as read inside the current unit of work.
    pub account: &'a Account,
    /// The freeze being applied.
    pub freeze_type: FreezeType,
    /// The event of the same type, if already present.
    pub existing: Option<&'a FreezeEvent>,
    /// Snapshot folded from the events this freeze replaces, if any.
    pub inherited: Option<&'a FreezeEventLimits>,
    /// Countdown for a newly created event.
    pub days_till_escalation: Option<i64>,
    /// Whether project rate and burst limits are zeroed too.
    pub zero_rate_limits: bool,
    /// Creation time for a newly created event.
    pub now: DateTime<Utc>,
}

/// Captures the account's live limits into an event of `request.freeze_type`,
/// upserts it, then zeroes the owner limits and every owned project.
///
/// Returns the stored event.
///
/// # Errors
///
/// Returns the first store error; the caller's unit of work rolls back.
pub fn snapshot_and_zero(
    tx: &dyn DbTx,
    request: &FreezeRequest<'_>,
) -> Result<FreezeEvent, StoreError> {
    let account = request.account;
    let live_user = account.owner_limits;

    let mut event = request.existing.cloned().unwrap_or_else(|| {
        FreezeEvent::new(
            account.id,
            request.freeze_type,
            request.days_till_escalation,
            request.now,
        )
    });
    let inherited_limits = request.inherited;
    let limits = event.limits.get_or_insert_with(|| {
        inherited_limits
            .cloned()
            .unwrap_or_else(|| FreezeEventLimits::for_user(live_user))
    });

    if !live_user.is_zero() {
        limits.user = live_user;
    }

    let projects = tx.owned_projects(account.id)?;
    for project in &projects {
        let live = ProjectSnapshot::from_live(project);
        let mut entry = if live.is_zeroed() {
            match inherited_limits.and_then(|l| l.projects.get(&project.id)) {
                Some(inherited) => *inherited,
                None => {
                    debug!(project_id = %project.id, "project already zeroed; keeping snapshot");
                    continue;
                },
            }
        } else {
            live
        };
        entry.carry_rate_limits(project.rate);
        if request.zero_rate_limits {
            entry.rate_limits_zeroed = true;
        }
        limits.projects.insert(project.id, entry);
    }

    let stored = tx.upsert_freeze_event(&event)?;

    tx.update_owner_limits(account.id, UsageLimits::ZERO)?;
    let zeroed = ProjectLimitsUpdate::zeroed(request.zero_rate_limits);
    for project in &projects {
        tx.update_project_limits(project.id, &zeroed)?;
    }

    debug!(
        account_id = %account.id,
        freeze_type = %request.freeze_type,
        projects = projects.len(),
        "captured and zeroed limits"
    );
    Ok(stored)
}
