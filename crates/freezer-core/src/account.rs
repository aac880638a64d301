//! Accounts and projects as seen by the freeze subsystem.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::limits::{RateLimits, UsageLimits};

/// Identifier of a tenant account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

/// Identifier of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(AccountId);
uuid_id!(ProjectId);

/// Lifecycle status of an account.
///
/// The integer codes are the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AccountStatus {
    /// Registered but not yet activated.
    Inactive,
    /// In good standing.
    #[default]
    Active,
    /// Deleted.
    Deleted,
    /// Scheduled for deletion.
    PendingDeletion,
    /// Held for legal review.
    LegalHold,
    /// Awaiting an administrator's bot review.
    PendingBotVerification,
    /// The owner asked for the account to be deleted.
    UserRequestedDeletion,
}

impl AccountStatus {
    /// All statuses, in code order.
    pub const ALL: [Self; 7] = [
        Self::Inactive,
        Self::Active,
        Self::Deleted,
        Self::PendingDeletion,
        Self::LegalHold,
        Self::PendingBotVerification,
        Self::UserRequestedDeletion,
    ];

    /// Returns the persisted code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Inactive => 0,
            Self::Active => 1,
            Self::Deleted => 2,
            Self::PendingDeletion => 3,
            Self::LegalHold => 4,
            Self::PendingBotVerification => 5,
            Self::UserRequestedDeletion => 6,
        }
    }

    /// Parses a persisted code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Returns the status as a string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Deleted => "deleted",
            Self::PendingDeletion => "pending_deletion",
            Self::LegalHold => "legal_hold",
            Self::PendingBotVerification => "pending_bot_verification",
            Self::UserRequestedDeletion => "user_requested_deletion",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Contact email, forwarded to the freeze tracker.
    pub email: String,
    /// Current lifecycle status.
    pub status: AccountStatus,
    /// Default ceilings granted to projects this account creates.
    pub owner_limits: UsageLimits,
    /// When `status` last changed.
    pub status_updated_at: DateTime<Utc>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// A project owned by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Owning account.
    pub owner_id: AccountId,
    /// Display name.
    pub name: String,
    /// Live usage ceilings enforced by the data plane.
    pub usage: UsageLimits,
    /// Storage ceiling the owner chose below the granted one.
    pub user_set_storage: Option<i64>,
    /// Bandwidth ceiling the owner chose below the granted one.
    pub user_set_bandwidth: Option<i64>,
    /// Live request-rate ceilings.
    pub rate: RateLimits,
}

/// Parameters for creating an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Identifier to assign; generated when `None`.
    pub id: Option<AccountId>,
    /// Contact email.
    pub email: String,
    /// Initial status.
    pub status: AccountStatus,
    /// Default project ceilings.
    pub owner_limits: UsageLimits,
}

impl NewAccount {
    /// An active account with the given email and owner limits.
    #[must_use]
    pub fn active(email: impl Into<String>, owner_limits: UsageLimits) -> Self {
        Self {
            id: None,
            email: email.into(),
            status: AccountStatus::Active,
            owner_limits,
        }
    }
}

/// Parameters for creating a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    /// Identifier to assign; generated when `None`.
    pub id: Option<ProjectId>,
    /// Owning account.
    pub owner_id: AccountId,
    /// Display name.
    pub name: String,
    /// Initial usage ceilings.
    pub usage: UsageLimits,
    /// Initial rate limits.
    pub rate: RateLimits,
}

impl NewProject {
    /// A project with the given ceilings and default rate limits.
    #[must_use]
    pub fn new(owner_id: AccountId, name: impl Into<String>, usage: UsageLimits) -> Self {
        Self {
            id: None,
            owner_id,
            name: name.into(),
            usage,
            rate: RateLimits::default(),
        }
    }

    /// Sets the initial rate limits.
    #[must_use]
    pub const fn with_rate(mut self, rate: RateLimits) -> Self {
        self.rate = rate;
        self
    }
}
