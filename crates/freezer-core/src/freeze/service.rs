//! Freeze orchestration.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::policy::{Escalation, Refusal};
use super::restore::restore_and_delete;
use super::snapshot::{FreezeRequest, snapshot_and_zero};
use super::{
    AccountFreezeEvents, EscalatedEvent, EscalatedEventsQuery, FreezeError, FreezeEvent,
    FreezeEventsCursor, FreezeEventsPage, FreezeType, Operation,
};
use crate::account::AccountId;
use crate::config::FreezeConfig;
use crate::limits::FreezeEventLimits;
use crate::store::{Cancellation, FreezeDb};
use crate::tracker::FreezeTracker;

/// Result of a committed freeze, kept until the tracker has been told.
struct Applied {
    event: FreezeEvent,
    email: String,
    changed: bool,
}

/// Applies, lifts and inspects account freezes.
///
/// Every mutating operation runs in one unit of work on `D`. The tracker is
/// notified only after that unit of work has committed.
pub struct AccountFreezeService<D> {
    db: D,
    tracker: Arc<dyn FreezeTracker>,
    config: FreezeConfig,
    cancel: Cancellation,
}

impl<D> std::fmt::Debug for AccountFreezeService<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountFreezeService")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<D: FreezeDb> AccountFreezeService<D> {
    /// Creates a new service.
    #[must_use]
    pub fn new(db: D, tracker: Arc<dyn FreezeTracker>, config: FreezeConfig) -> Self {
        Self {
            db,
            tracker,
            config,
            cancel: Cancellation::new(),
        }
    }

    /// Uses `cancel` for every unit of work (builder pattern).
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the cancellation flag shared by this service's operations.
    #[must_use]
    pub const fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Returns the grace period configuration.
    #[must_use]
    pub const fn config(&self) -> &FreezeConfig {
        &self.config
    }

    /// Returns the underlying database.
    #[must_use]
    pub const fn db(&self) -> &D {
        &self.db
    }

    /// Freezes an account for nonpayment.
    ///
    /// Supersedes a billing warning. An existing billing freeze keeps its
    /// snapshot and countdown.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account has a violation, legal, delayed
    /// bot or bot event.
    pub fn billing_freeze_user(&self, account_id: AccountId) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::BillingFreeze)
    }

    /// Lifts a billing freeze.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not billing frozen.
    pub fn billing_unfreeze_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::BillingFreeze)
    }

    /// Warns an account that a billing freeze is coming. Does nothing if the
    /// account is already warned.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account has a violation, billing or
    /// legal freeze.
    pub fn billing_warn_user(&self, account_id: AccountId) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::BillingWarning)
    }

    /// Lifts a billing warning.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not warned.
    pub fn billing_unwarn_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::BillingWarning)
    }

    /// Freezes an account for a terms-of-service violation and marks it
    /// pending deletion.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account has a legal or bot freeze.
    pub fn violation_freeze_user(
        &self,
        account_id: AccountId,
    ) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::ViolationFreeze)
    }

    /// Lifts a violation freeze.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not violation frozen.
    pub fn violation_unfreeze_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::ViolationFreeze)
    }

    /// Freezes an account for legal review, zeroes rate limits and signs the
    /// owner out everywhere.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account has a violation or bot freeze.
    pub fn legal_freeze_user(&self, account_id: AccountId) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::LegalFreeze)
    }

    /// Lifts a legal freeze.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not legal frozen.
    pub fn legal_unfreeze_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::LegalFreeze)
    }

    /// Schedules an account for bot review after `days`. No limits change.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error for a negative `days`, or a store
    /// error.
    pub fn delayed_bot_freeze_user(
        &self,
        account_id: AccountId,
        days: Option<i64>,
    ) -> Result<FreezeEvent, FreezeError> {
        let freeze_type = FreezeType::DelayedBotFreeze;
        if days.is_some_and(i64::is_negative) {
            return Err(FreezeError::invalid_argument("days must not be negative")
                .in_operation(Operation::Freeze(freeze_type), account_id));
        }
        self.apply(account_id, freeze_type, days, None)
    }

    /// Freezes an account pending bot review.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account is already bot frozen or
    /// pending bot verification.
    pub fn bot_freeze_user(&self, account_id: AccountId) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::BotFreeze)
    }

    /// Lifts a bot freeze.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not bot frozen.
    pub fn bot_unfreeze_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::BotFreeze)
    }

    /// Freezes an account whose free trial expired.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the account has a violation, legal or bot
    /// freeze.
    pub fn trial_expiration_freeze_user(
        &self,
        account_id: AccountId,
    ) -> Result<FreezeEvent, FreezeError> {
        self.freeze(account_id, FreezeType::TrialExpirationFreeze)
    }

    /// Lifts a trial expiration freeze.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the account is not trial frozen.
    pub fn trial_expiration_unfreeze_user(&self, account_id: AccountId) -> Result<(), FreezeError> {
        self.unfreeze(account_id, FreezeType::TrialExpirationFreeze)
    }

    /// Applies a freeze of any type with its configured countdown.
    ///
    /// A delayed bot freeze applied this way carries no countdown.
    ///
    /// # Errors
    ///
    /// Returns a policy error if the policy table refuses the freeze.
    pub fn freeze(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<FreezeEvent, FreezeError> {
        self.apply(account_id, freeze_type, self.configured_days(freeze_type), None)
    }

    fn configured_days(&self, freeze_type: FreezeType) -> Option<i64> {
        match freeze_type {
            FreezeType::BillingFreeze => Some(self.config.billing_freeze_grace_days()),
            FreezeType::BillingWarning => Some(self.config.billing_warn_grace_days()),
            _ => None,
        }
    }

    /// Applies `freeze_type`. With `escalating` set, the freeze only goes
    /// through while the account still has an event of that type.
    fn apply(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
        days_till_escalation: Option<i64>,
        escalating: Option<FreezeType>,
    ) -> Result<FreezeEvent, FreezeError> {
        let policy = freeze_type.policy();
        let operation = escalating.map_or(Operation::Freeze(freeze_type), Operation::Escalate);
        let applied = self
            .db
            .with_tx(&self.cancel, |tx| -> Result<Applied, FreezeError> {
                let now = Utc::now();
                let account = tx.account(account_id)?;
                let existing = tx.freeze_events(account_id)?;

                if let Some(source) = escalating {
                    if !existing.contains(source) {
                        return Err(FreezeError::no_freeze_status(account_id, source));
                    }
                }

                policy
                    .check(account.status, &existing)
                    .map_err(|refusal| refused(freeze_type, refusal))?;

                if freeze_type == FreezeType::BillingWarning {
                    if let Some(warning) = existing.get(freeze_type) {
                        return Ok(Applied {
                            event: warning.clone(),
                            email: account.email,
                            changed: false,
                        });
                    }
                }

                let current = existing.get(freeze_type);
                // Every replaced snapshot is folded in before its event goes.
                let replaced = policy.replaced(&existing);
                let inherited =
                    FreezeEventLimits::merged(replaced.iter().filter_map(|e| e.limits.as_ref()));
                let event = if policy.captures_limits {
                    snapshot_and_zero(
                        tx,
                        &FreezeRequest {
                            account: &account,
                            freeze_type,
                            existing: current,
                            inherited: inherited.as_ref(),
                            days_till_escalation,
                            zero_rate_limits: policy.zeroes_rate_limits,
                            now,
                        },
                    )?
                } else {
                    // Advisory events carry no snapshot; a repeat only moves
                    // the countdown.
                    let mut event = current.cloned().unwrap_or_else(|| {
                        FreezeEvent::new(account_id, freeze_type, days_till_escalation, now)
                    });
                    event.days_till_escalation = days_till_escalation;
                    tx.upsert_freeze_event(&event)?
                };

                for old in replaced {
                    if tx.delete_freeze_event(account_id, old.freeze_type)? {
                        debug!(%account_id, superseded = %old.freeze_type, by = %freeze_type, "superseded freeze event");
                    }
                }

                if let Some(status) = policy.sets_status {
                    tx.update_account_status(account_id, status, now)?;
                }
                if policy.invalidates_sessions {
                    let sessions = tx.delete_sessions(account_id)?;
                    debug!(%account_id, sessions, "invalidated web sessions");
                }

                Ok(Applied {
                    event,
                    email: account.email,
                    changed: true,
                })
            })
            .map_err(|err| err.in_operation(operation, account_id))?;

        if applied.changed {
            info!(%account_id, %freeze_type, "applied account freeze");
            if policy.captures_limits {
                self.tracker
                    .track_account_frozen(account_id, &applied.email, freeze_type);
            } else {
                self.tracker
                    .track_account_freeze_warning(account_id, &applied.email, freeze_type);
            }
        }
        Ok(applied.event)
    }

    /// Lifts a freeze of any type.
    ///
    /// Enforcing freezes have their snapshot restored; advisory events are
    /// simply deleted.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the event does not exist, or an
    /// invariant error if an enforcing event has no snapshot.
    pub fn unfreeze(&self, account_id: AccountId, freeze_type: FreezeType) -> Result<(), FreezeError> {
        let policy = freeze_type.policy();
        let email = self
            .db
            .with_tx(&self.cancel, |tx| -> Result<String, FreezeError> {
                let account = tx.account(account_id)?;
                let event = tx
                    .freeze_event(account_id, freeze_type)?
                    .ok_or_else(|| FreezeError::no_freeze_status(account_id, freeze_type))?;

                if policy.captures_limits {
                    let status = restore_and_delete(tx, &account, &event, Utc::now())?;
                    debug!(%account_id, %freeze_type, %status, "restored limits");
                } else {
                    tx.delete_freeze_event(account_id, freeze_type)?;
                }
                Ok(account.email)
            })
            .map_err(|err| err.in_operation(Operation::Unfreeze(freeze_type), account_id))?;

        info!(%account_id, %freeze_type, "lifted account freeze");
        if policy.captures_limits {
            self.tracker
                .track_account_unfrozen(account_id, &email, freeze_type);
        } else {
            self.tracker
                .track_account_unwarned(account_id, &email, freeze_type);
        }
        Ok(())
    }

    /// Escalates an overdue billing freeze: the countdown is cleared and the
    /// account is marked pending deletion.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error if `event` is not a billing freeze
    /// of `account_id`, or a no-such-freeze error if it no longer exists.
    pub fn escalate_billing_freeze(
        &self,
        account_id: AccountId,
        event: &FreezeEvent,
    ) -> Result<(), FreezeError> {
        if event.freeze_type != FreezeType::BillingFreeze {
            return Err(FreezeError::invalid_argument(format!(
                "expected a billing freeze event, got {}",
                event.freeze_type
            ))
            .in_operation(Operation::Escalate(event.freeze_type), account_id));
        }
        self.escalate_to_status(account_id, event)
    }

    /// Escalates an overdue event as its policy prescribes: status
    /// escalations behave like [`Self::escalate_billing_freeze`], freeze
    /// escalations apply the stronger freeze, which supersedes the event.
    ///
    /// # Errors
    ///
    /// Returns [`FreezeError::NotEscalatable`] for types without escalation,
    /// or any error of the underlying operation.
    pub fn escalate(&self, account_id: AccountId, event: &FreezeEvent) -> Result<(), FreezeError> {
        let freeze_type = event.freeze_type;
        match freeze_type.policy().escalation {
            Some(Escalation::Status(_)) => self.escalate_to_status(account_id, event),
            Some(Escalation::Freeze(next)) => {
                check_owner(account_id, event)?;
                self.apply(account_id, next, self.configured_days(next), Some(freeze_type))
                    .map(|_| ())
            },
            None => Err(FreezeError::NotEscalatable { freeze_type }
                .in_operation(Operation::Escalate(freeze_type), account_id)),
        }
    }

    fn escalate_to_status(&self, account_id: AccountId, event: &FreezeEvent) -> Result<(), FreezeError> {
        let freeze_type = event.freeze_type;
        let Some(Escalation::Status(status)) = freeze_type.policy().escalation else {
            return Err(FreezeError::NotEscalatable { freeze_type }
                .in_operation(Operation::Escalate(freeze_type), account_id));
        };
        check_owner(account_id, event)?;

        self.db
            .with_tx(&self.cancel, |tx| -> Result<(), FreezeError> {
                let mut current = tx
                    .freeze_event(account_id, freeze_type)?
                    .ok_or_else(|| FreezeError::no_freeze_status(account_id, freeze_type))?;
                current.days_till_escalation = None;
                tx.upsert_freeze_event(&current)?;
                tx.update_account_status(account_id, status, Utc::now())?;
                Ok(())
            })
            .map_err(|err| err.in_operation(Operation::Escalate(freeze_type), account_id))?;

        info!(%account_id, %freeze_type, %status, "escalated freeze event");
        Ok(())
    }

    /// Reads one event.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn get(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<Option<FreezeEvent>, FreezeError> {
        self.db
            .with_tx(&self.cancel, |tx| -> Result<_, FreezeError> {
                Ok(tx.freeze_event(account_id, freeze_type)?)
            })
            .map_err(|err| err.in_operation(Operation::Query, account_id))
    }

    /// Reads every event of an account.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn get_all(&self, account_id: AccountId) -> Result<AccountFreezeEvents, FreezeError> {
        self.db
            .with_tx(&self.cancel, |tx| -> Result<_, FreezeError> {
                Ok(tx.freeze_events(account_id)?)
            })
            .map_err(|err| err.in_operation(Operation::Query, account_id))
    }

    /// Lists events across all accounts, ordered by account id then type.
    /// An empty `types` slice selects every type.
    ///
    /// # Errors
    ///
    /// Returns an invalid argument error for a zero page size, or a store
    /// error.
    pub fn get_all_events(
        &self,
        cursor: &FreezeEventsCursor,
        types: &[FreezeType],
    ) -> Result<FreezeEventsPage, FreezeError> {
        if cursor.limit == 0 {
            return Err(FreezeError::invalid_argument("page limit must be positive"));
        }
        self.db.with_tx(&self.cancel, |tx| -> Result<_, FreezeError> {
            Ok(tx.list_freeze_events(cursor, types)?)
        })
    }

    /// Returns `true` if the account has an event of `freeze_type`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn is_frozen(&self, account_id: AccountId, freeze_type: FreezeType) -> Result<bool, FreezeError> {
        Ok(self.get(account_id, freeze_type)?.is_some())
    }

    /// Returns `true` if the account is billing frozen.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn is_billing_frozen(&self, account_id: AccountId) -> Result<bool, FreezeError> {
        self.is_frozen(account_id, FreezeType::BillingFreeze)
    }

    /// Returns `true` if the account is violation frozen.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn is_violation_frozen(&self, account_id: AccountId) -> Result<bool, FreezeError> {
        self.is_frozen(account_id, FreezeType::ViolationFreeze)
    }

    /// Records that one more reminder was sent for an event.
    ///
    /// # Errors
    ///
    /// Returns a no-such-freeze error if the event does not exist.
    pub fn increment_notifications_count(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<(), FreezeError> {
        self.db
            .with_tx(&self.cancel, |tx| -> Result<(), FreezeError> {
                if tx.increment_notifications_count(account_id, freeze_type)? {
                    Ok(())
                } else {
                    Err(FreezeError::no_freeze_status(account_id, freeze_type))
                }
            })
            .map_err(|err| err.in_operation(Operation::Notify(freeze_type), account_id))
    }

    /// Discards every event of an account without restoring anything. Meant
    /// for accounts that are being deleted; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    pub fn delete_all(&self, account_id: AccountId) -> Result<u64, FreezeError> {
        let deleted = self
            .db
            .with_tx(&self.cancel, |tx| -> Result<u64, FreezeError> {
                Ok(tx.delete_freeze_events(account_id)?)
            })
            .map_err(|err| err.in_operation(Operation::Purge, account_id))?;
        info!(%account_id, deleted, "purged freeze events");
        Ok(deleted)
    }

    /// Lists events whose account has been pending deletion since before the
    /// per-type threshold, oldest escalation first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub fn get_escalated_events_before(
        &self,
        queries: &[EscalatedEventsQuery],
        limit: usize,
    ) -> Result<Vec<EscalatedEvent>, FreezeError> {
        self.db.with_tx(&self.cancel, |tx| -> Result<_, FreezeError> {
            Ok(tx.escalated_events_before(queries, limit)?)
        })
    }
}

fn check_owner(account_id: AccountId, event: &FreezeEvent) -> Result<(), FreezeError> {
    if event.account_id == account_id {
        return Ok(());
    }
    Err(
        FreezeError::invalid_argument(format!("event belongs to {}", event.account_id))
            .in_operation(Operation::Escalate(event.freeze_type), account_id),
    )
}

fn refused(freeze_type: FreezeType, refusal: Refusal) -> FreezeError {
    match refusal {
        Refusal::Event(blocking) => FreezeError::Blocked {
            freeze_type,
            blocking,
        },
        Refusal::Status(status) => FreezeError::StatusConflict {
            freeze_type,
            status,
        },
    }
}
