//! Precedence and exclusivity rules between freeze types.
//!
//! Every rule lives in one [`FreezePolicy`] record per [`FreezeType`], so the
//! order of checks is fixed by the table rather than by call sites.

use super::{AccountFreezeEvents, FreezeEvent, FreezeType};
use crate::account::AccountStatus;

/// What happens when an event's escalation countdown runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The account moves to this status and the event stops escalating.
    Status(AccountStatus),
    /// The warning is replaced by a freeze of this type.
    Freeze(FreezeType),
}

/// The policy attributes of one freeze type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezePolicy {
    /// The type this record describes.
    pub freeze_type: FreezeType,
    /// Existing events that make applying this type fail.
    pub blocked_by: &'static [FreezeType],
    /// Account status that makes applying this type fail.
    pub blocked_by_status: Option<AccountStatus>,
    /// Events whose snapshot is inherited, in order of preference. The first
    /// one present is used and deleted once this freeze is written.
    pub inherits_from: &'static [FreezeType],
    /// Events deleted unconditionally once this freeze is written.
    pub supersedes: &'static [FreezeType],
    /// Whether applying this type captures a snapshot and zeroes limits.
    pub captures_limits: bool,
    /// Status set on the account when applied.
    pub sets_status: Option<AccountStatus>,
    /// Status this type holds while present; unfreezing reverts it to
    /// `Active` when no other event holds it.
    pub holds_status: Option<AccountStatus>,
    /// Whether project rate and burst limits are zeroed as well.
    pub zeroes_rate_limits: bool,
    /// Whether all web sessions of the account are deleted.
    pub invalidates_sessions: bool,
    /// What the countdown escalates into, if anything.
    pub escalation: Option<Escalation>,
}

const BILLING_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::BillingFreeze,
    blocked_by: &[
        FreezeType::ViolationFreeze,
        FreezeType::LegalFreeze,
        FreezeType::DelayedBotFreeze,
        FreezeType::BotFreeze,
    ],
    blocked_by_status: None,
    inherits_from: &[],
    supersedes: &[FreezeType::BillingWarning],
    captures_limits: true,
    sets_status: None,
    holds_status: Some(AccountStatus::PendingDeletion),
    zeroes_rate_limits: false,
    invalidates_sessions: false,
    escalation: Some(Escalation::Status(AccountStatus::PendingDeletion)),
};

const BILLING_WARNING: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::BillingWarning,
    blocked_by: &[
        FreezeType::ViolationFreeze,
        FreezeType::BillingFreeze,
        FreezeType::LegalFreeze,
    ],
    blocked_by_status: None,
    inherits_from: &[],
    supersedes: &[],
    captures_limits: false,
    sets_status: None,
    holds_status: None,
    zeroes_rate_limits: false,
    invalidates_sessions: false,
    escalation: Some(Escalation::Freeze(FreezeType::BillingFreeze)),
};

const VIOLATION_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::ViolationFreeze,
    blocked_by: &[FreezeType::LegalFreeze, FreezeType::BotFreeze],
    blocked_by_status: None,
    inherits_from: &[
        FreezeType::BillingFreeze,
        FreezeType::TrialExpirationFreeze,
        FreezeType::BillingWarning,
    ],
    supersedes: &[],
    captures_limits: true,
    sets_status: Some(AccountStatus::PendingDeletion),
    holds_status: Some(AccountStatus::PendingDeletion),
    zeroes_rate_limits: false,
    invalidates_sessions: false,
    escalation: None,
};

const LEGAL_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::LegalFreeze,
    blocked_by: &[FreezeType::ViolationFreeze, FreezeType::BotFreeze],
    blocked_by_status: None,
    inherits_from: &[
        FreezeType::BillingFreeze,
        FreezeType::TrialExpirationFreeze,
        FreezeType::BillingWarning,
    ],
    supersedes: &[],
    captures_limits: true,
    sets_status: Some(AccountStatus::LegalHold),
    holds_status: Some(AccountStatus::LegalHold),
    zeroes_rate_limits: true,
    invalidates_sessions: true,
    escalation: None,
};

const DELAYED_BOT_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::DelayedBotFreeze,
    blocked_by: &[],
    blocked_by_status: None,
    inherits_from: &[],
    supersedes: &[],
    captures_limits: false,
    sets_status: None,
    holds_status: None,
    zeroes_rate_limits: false,
    invalidates_sessions: false,
    escalation: Some(Escalation::Freeze(FreezeType::BotFreeze)),
};

const BOT_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::BotFreeze,
    blocked_by: &[FreezeType::BotFreeze],
    blocked_by_status: Some(AccountStatus::PendingBotVerification),
    inherits_from: &[FreezeType::BillingFreeze, FreezeType::TrialExpirationFreeze],
    supersedes: &[
        FreezeType::DelayedBotFreeze,
        FreezeType::BillingFreeze,
        FreezeType::TrialExpirationFreeze,
    ],
    captures_limits: true,
    sets_status: Some(AccountStatus::PendingBotVerification),
    holds_status: Some(AccountStatus::PendingBotVerification),
    zeroes_rate_limits: true,
    invalidates_sessions: true,
    escalation: None,
};

// Trial expiration changes limits only; the account keeps its status.
const TRIAL_EXPIRATION_FREEZE: FreezePolicy = FreezePolicy {
    freeze_type: FreezeType::TrialExpirationFreeze,
    blocked_by: &[
        FreezeType::ViolationFreeze,
        FreezeType::LegalFreeze,
        FreezeType::BotFreeze,
    ],
    blocked_by_status: None,
    inherits_from: &[],
    supersedes: &[],
    captures_limits: true,
    sets_status: None,
    holds_status: None,
    zeroes_rate_limits: true,
    invalidates_sessions: false,
    escalation: None,
};

/// Returns the policy record for `freeze_type`.
#[must_use]
pub const fn policy_for(freeze_type: FreezeType) -> &'static FreezePolicy {
    match freeze_type {
        FreezeType::BillingFreeze => &BILLING_FREEZE,
        FreezeType::BillingWarning => &BILLING_WARNING,
        FreezeType::ViolationFreeze => &VIOLATION_FREEZE,
        FreezeType::LegalFreeze => &LEGAL_FREEZE,
        FreezeType::DelayedBotFreeze => &DELAYED_BOT_FREEZE,
        FreezeType::BotFreeze => &BOT_FREEZE,
        FreezeType::TrialExpirationFreeze => &TRIAL_EXPIRATION_FREEZE,
    }
}

/// Why a freeze may not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// An event of this type is present.
    Event(FreezeType),
    /// The account has this status.
    Status(AccountStatus),
}

impl FreezePolicy {
    /// Checks whether this freeze may be applied to an account with `status`
    /// and the given existing events.
    ///
    /// The status check runs first, then `blocked_by` in table order.
    ///
    /// # Errors
    ///
    /// Returns the first [`Refusal`] encountered.
    pub fn check(
        &self,
        status: AccountStatus,
        existing: &AccountFreezeEvents,
    ) -> Result<(), Refusal> {
        if self.blocked_by_status == Some(status) {
            return Err(Refusal::Status(status));
        }
        match self.blocked_by.iter().find(|t| existing.contains(**t)) {
            Some(blocking) => Err(Refusal::Event(*blocking)),
            None => Ok(()),
        }
    }

    /// Returns the event whose snapshot this freeze inherits, if any.
    #[must_use]
    pub fn inherited<'a>(&self, existing: &'a AccountFreezeEvents) -> Option<&'a FreezeEvent> {
        self.inherits_from.iter().find_map(|t| existing.get(*t))
    }

    /// Returns the events deleted once this freeze is written: the inherited
    /// event first, then every superseded type present.
    #[must_use]
    pub fn replaced<'a>(&self, existing: &'a AccountFreezeEvents) -> Vec<&'a FreezeEvent> {
        let mut replaced: Vec<&FreezeEvent> = self.inherited(existing).into_iter().collect();
        for freeze_type in self.supersedes {
            if *freeze_type == self.freeze_type
                || replaced.iter().any(|e| e.freeze_type == *freeze_type)
            {
                continue;
            }
            replaced.extend(existing.get(*freeze_type));
        }
        replaced
    }

    /// Returns `true` if applying this type is an enforcement action that
    /// zeroes limits.
    #[must_use]
    pub const fn is_enforcing(&self) -> bool {
        self.captures_limits
    }

    /// Returns `true` if this type carries an escalation countdown.
    #[must_use]
    pub const fn escalates(&self) -> bool {
        self.escalation.is_some()
    }
}
