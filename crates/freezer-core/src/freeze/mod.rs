//! Account freeze state machine.
//!
//! # Overview
//!
//! A *freeze* suspends an account by zeroing its default project ceilings and
//! the live ceilings of every project it owns. Before zeroing, the current
//! values are captured into a [`FreezeEvent`] so that lifting the freeze puts
//! them back exactly. Several independent reasons can be layered on the same
//! account; the [`policy`] table decides which combinations are allowed and
//! which event's snapshot a stronger freeze inherits.
//!
//! ```text
//!            billing_warn ─────────────┐
//!                 │ (escalates)        │ unwarn
//!                 ▼                    ▼
//!  Active ── billing/violation/legal/bot/trial freeze ──▶ Suspended(type)
//!    ▲                                                        │
//!    └──────────────────── matching unfreeze ◀────────────────┘
//! ```
//!
//! # Components
//!
//! - [`policy`]: precedence/exclusivity table, one record per [`FreezeType`].
//! - [`snapshot`]: capture-then-zero, guarded by the all-zero sentinel so a
//!   second freeze never overwrites the first freeze's snapshot.
//! - [`restore`]: replay a snapshot and delete its event.
//! - [`service`]: [`AccountFreezeService`], one transaction per operation.
//!
//! All coordination is delegated to the store's transactions; nothing here
//! caches freeze state between calls.

mod error;
pub mod policy;
pub mod restore;
mod service;
pub mod snapshot;

#[cfg(test)]
mod proptest_freeze;
#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{ErrorClass, FreezeError, Operation};
pub use policy::{Escalation, FreezePolicy};
pub use service::AccountFreezeService;

use crate::account::AccountId;
use crate::limits::FreezeEventLimits;

/// The reason an account is frozen or warned.
///
/// The integer codes are the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeType {
    /// Frozen for nonpayment of invoices.
    BillingFreeze,
    /// Warned that a billing freeze is coming.
    BillingWarning,
    /// Frozen for a terms-of-service violation.
    ViolationFreeze,
    /// Frozen for legal review.
    LegalFreeze,
    /// Scheduled for bot review after a delay.
    DelayedBotFreeze,
    /// Frozen pending an administrator's bot review.
    BotFreeze,
    /// Frozen because the free trial expired.
    TrialExpirationFreeze,
}

impl FreezeType {
    /// All freeze types, in code order.
    pub const ALL: [Self; 7] = [
        Self::BillingFreeze,
        Self::BillingWarning,
        Self::ViolationFreeze,
        Self::LegalFreeze,
        Self::DelayedBotFreeze,
        Self::BotFreeze,
        Self::TrialExpirationFreeze,
    ];

    /// Returns the persisted code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::BillingFreeze => 0,
            Self::BillingWarning => 1,
            Self::ViolationFreeze => 2,
            Self::LegalFreeze => 3,
            Self::DelayedBotFreeze => 4,
            Self::BotFreeze => 5,
            Self::TrialExpirationFreeze => 6,
        }
    }

    /// Parses a persisted code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Returns the type as a string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BillingFreeze => "billing_freeze",
            Self::BillingWarning => "billing_warning",
            Self::ViolationFreeze => "violation_freeze",
            Self::LegalFreeze => "legal_freeze",
            Self::DelayedBotFreeze => "delayed_bot_freeze",
            Self::BotFreeze => "bot_freeze",
            Self::TrialExpirationFreeze => "trial_expiration_freeze",
        }
    }

    /// Returns the human-readable label used in operator-facing output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BillingFreeze => "Billing Freeze",
            Self::BillingWarning => "Billing Warning",
            Self::ViolationFreeze => "Violation Freeze",
            Self::LegalFreeze => "Legal Freeze",
            Self::DelayedBotFreeze => "Delayed Bot Freeze",
            Self::BotFreeze => "Bot Freeze",
            Self::TrialExpirationFreeze => "Trial Expiration Freeze",
        }
    }

    /// The policy record for this type.
    #[must_use]
    pub const fn policy(self) -> &'static FreezePolicy {
        policy::policy_for(self)
    }
}

impl fmt::Display for FreezeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown freeze type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown freeze type: {0}")]
pub struct UnknownFreezeType(pub String);

impl FromStr for FreezeType {
    type Err = UnknownFreezeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| {
                t.as_str() == normalized || t.as_str().trim_end_matches("_freeze") == normalized
            })
            .ok_or_else(|| UnknownFreezeType(s.to_string()))
    }
}

/// A freeze or warning recorded against an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeEvent {
    /// The frozen account.
    pub account_id: AccountId,
    /// Why it is frozen.
    pub freeze_type: FreezeType,
    /// Captured pre-freeze limits; absent for advisory types.
    pub limits: Option<FreezeEventLimits>,
    /// Grace period in days before escalation; `None` means the event no
    /// longer escalates.
    pub days_till_escalation: Option<i64>,
    /// Number of reminders sent for this event.
    pub notifications_count: i64,
    /// When the event was first recorded.
    pub created_at: DateTime<Utc>,
}

impl FreezeEvent {
    /// Creates a new event without a snapshot.
    #[must_use]
    pub const fn new(
        account_id: AccountId,
        freeze_type: FreezeType,
        days_till_escalation: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            freeze_type,
            limits: None,
            days_till_escalation,
            notifications_count: 0,
            created_at,
        }
    }

    /// Attaches a snapshot (builder pattern).
    #[must_use]
    pub fn with_limits(mut self, limits: FreezeEventLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// The composite key of this event.
    #[must_use]
    pub const fn key(&self) -> EventKey {
        EventKey {
            account_id: self.account_id,
            freeze_type: self.freeze_type,
        }
    }

    /// Whole days elapsed between `created_at` and `now`.
    #[must_use]
    pub fn days_elapsed(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Days left before `event` escalates, negative once overdue. `None` if the
/// event has no countdown.
#[must_use]
pub fn days_till_escalation(event: &FreezeEvent, now: DateTime<Utc>) -> Option<i64> {
    event
        .days_till_escalation
        .map(|days| days - event.days_elapsed(now))
}

/// Returns `true` once more whole days have elapsed than the countdown
/// allows.
#[must_use]
pub fn should_escalate(event: &FreezeEvent, now: DateTime<Utc>) -> bool {
    event
        .days_till_escalation
        .is_some_and(|days| event.days_elapsed(now) > days)
}

/// Composite key of a freeze event, also used as a listing cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Account part.
    pub account_id: AccountId,
    /// Type part.
    pub freeze_type: FreezeType,
}

/// All freeze events of one account, one optional slot per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFreezeEvents {
    /// Billing freeze, if any.
    pub billing_freeze: Option<FreezeEvent>,
    /// Billing warning, if any.
    pub billing_warning: Option<FreezeEvent>,
    /// Violation freeze, if any.
    pub violation_freeze: Option<FreezeEvent>,
    /// Legal freeze, if any.
    pub legal_freeze: Option<FreezeEvent>,
    /// Delayed bot freeze, if any.
    pub delayed_bot_freeze: Option<FreezeEvent>,
    /// Bot freeze, if any.
    pub bot_freeze: Option<FreezeEvent>,
    /// Trial expiration freeze, if any.
    pub trial_expiration_freeze: Option<FreezeEvent>,
}

impl AccountFreezeEvents {
    /// Returns the slot for `freeze_type`.
    #[must_use]
    pub const fn get(&self, freeze_type: FreezeType) -> Option<&FreezeEvent> {
        match freeze_type {
            FreezeType::BillingFreeze => self.billing_freeze.as_ref(),
            FreezeType::BillingWarning => self.billing_warning.as_ref(),
            FreezeType::ViolationFreeze => self.violation_freeze.as_ref(),
            FreezeType::LegalFreeze => self.legal_freeze.as_ref(),
            FreezeType::DelayedBotFreeze => self.delayed_bot_freeze.as_ref(),
            FreezeType::BotFreeze => self.bot_freeze.as_ref(),
            FreezeType::TrialExpirationFreeze => self.trial_expiration_freeze.as_ref(),
        }
    }

    fn slot_mut(&mut self, freeze_type: FreezeType) -> &mut Option<FreezeEvent> {
        match freeze_type {
            FreezeType::BillingFreeze => &mut self.billing_freeze,
            FreezeType::BillingWarning => &mut self.billing_warning,
            FreezeType::ViolationFreeze => &mut self.violation_freeze,
            FreezeType::LegalFreeze => &mut self.legal_freeze,
            FreezeType::DelayedBotFreeze => &mut self.delayed_bot_freeze,
            FreezeType::BotFreeze => &mut self.bot_freeze,
            FreezeType::TrialExpirationFreeze => &mut self.trial_expiration_freeze,
        }
    }

    /// Puts `event` into its slot, returning the previous occupant.
    pub fn insert(&mut self, event: FreezeEvent) -> Option<FreezeEvent> {
        self.slot_mut(event.freeze_type).replace(event)
    }

    /// Returns `true` if an event of `freeze_type` is present.
    #[must_use]
    pub const fn contains(&self, freeze_type: FreezeType) -> bool {
        self.get(freeze_type).is_some()
    }

    /// Iterates over the present events in type-code order.
    pub fn iter(&self) -> impl Iterator<Item = &FreezeEvent> {
        FreezeType::ALL.into_iter().filter_map(|t| self.get(t))
    }

    /// Returns `true` if no event is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl FromIterator<FreezeEvent> for AccountFreezeEvents {
    fn from_iter<I: IntoIterator<Item = FreezeEvent>>(iter: I) -> Self {
        let mut events = Self::default();
        for event in iter {
            events.insert(event);
        }
        events
    }
}

/// Cursor for the global freeze-event listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeEventsCursor {
    /// Maximum number of events per page; must be positive.
    pub limit: usize,
    /// Key of the last event of the previous page.
    pub starting_after: Option<EventKey>,
}

impl FreezeEventsCursor {
    /// A cursor for the first page.
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self {
            limit,
            starting_after: None,
        }
    }
}

/// One page of the global freeze-event listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FreezeEventsPage {
    /// Events ordered by account id, then type code.
    pub events: Vec<FreezeEvent>,
    /// Whether more events follow this page.
    pub next: bool,
}

impl FreezeEventsPage {
    /// The cursor for the page after this one, if any.
    #[must_use]
    pub fn next_cursor(&self, limit: usize) -> Option<FreezeEventsCursor> {
        if !self.next {
            return None;
        }
        self.events.last().map(|last| FreezeEventsCursor {
            limit,
            starting_after: Some(last.key()),
        })
    }
}

/// Selects events of `freeze_type` whose account has been pending deletion
/// since before `older_than`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalatedEventsQuery {
    /// Event type to match.
    pub freeze_type: FreezeType,
    /// Upper bound (exclusive) on the account's `status_updated_at`.
    pub older_than: DateTime<Utc>,
}

/// An escalated event together with the time its account was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EscalatedEvent {
    /// The account.
    pub account_id: AccountId,
    /// The event type.
    pub freeze_type: FreezeType,
    /// When the account entered pending deletion.
    pub status_updated_at: DateTime<Utc>,
}
