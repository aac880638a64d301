//! Snapshot replay.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{FreezeError, FreezeEvent};
use crate::account::{Account, AccountStatus};
use crate::limits::ProjectLimitsUpdate;
use crate::store::DbTx;

/// Writes `event`'s snapshot back onto the account and its projects, deletes
/// the event and reverts the account status if this event was the last one
/// holding it.
///
/// Returns the account's status afterwards.
///
/// # Errors
///
/// Returns [`FreezeError::MissingSnapshot`] if the event carries no limits,
/// or the first store error.
pub fn restore_and_delete(
    tx: &dyn DbTx,
    account: &Account,
    event: &FreezeEvent,
    now: DateTime<Utc>,
) -> Result<AccountStatus, FreezeError> {
    let limits = event
        .limits
        .as_ref()
        .ok_or_else(|| FreezeError::missing_snapshot(account.id, event.freeze_type))?;

    for (project_id, snapshot) in &limits.projects {
        let update = ProjectLimitsUpdate::restore(snapshot);
        if !tx.update_project_limits(*project_id, &update)? {
            warn!(
                account_id = %account.id,
                %project_id,
                "project in freeze snapshot no longer exists; skipping"
            );
        }
    }
    // A zero capture was taken while another freeze held the limits; that
    // freeze owns them and may already have put them back.
    if limits.user.is_zero() {
        debug!(account_id = %account.id, "owner limits captured as zero; leaving them");
    } else {
        tx.update_owner_limits(account.id, limits.user)?;
    }
    tx.delete_freeze_event(account.id, event.freeze_type)?;

    let Some(held) = event.freeze_type.policy().holds_status else {
        return Ok(account.status);
    };
    if account.status != held {
        return Ok(account.status);
    }

    let remaining = tx.freeze_events(account.id)?;
    if let Some(holder) = remaining
        .iter()
        .find(|e| e.freeze_type.policy().holds_status == Some(held))
    {
        debug!(
            account_id = %account.id,
            status = %held,
            holder = %holder.freeze_type,
            "status still held by another freeze"
        );
        return Ok(account.status);
    }

    tx.update_account_status(account.id, AccountStatus::Active, now)?;
    Ok(AccountStatus::Active)
}
