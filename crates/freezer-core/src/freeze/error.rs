//! Error types for freeze operations.

use std::fmt;

use thiserror::Error;

use super::FreezeType;
use crate::account::{AccountId, AccountStatus};
use crate::store::StoreError;

/// A public operation of [`AccountFreezeService`](super::AccountFreezeService),
/// recorded on every error it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Applying a freeze or warning.
    Freeze(FreezeType),
    /// Lifting a freeze or warning.
    Unfreeze(FreezeType),
    /// Escalating an event past its grace period.
    Escalate(FreezeType),
    /// Reading freeze events.
    Query,
    /// Incrementing a notification counter.
    Notify(FreezeType),
    /// Discarding every event of an account.
    Purge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Freeze(FreezeType::BillingWarning) => f.write_str("billing warn"),
            Self::Unfreeze(FreezeType::BillingWarning) => f.write_str("billing unwarn"),
            Self::Freeze(t) => write!(f, "{}", t.label().to_ascii_lowercase()),
            Self::Unfreeze(t) => {
                let label = t.label().to_ascii_lowercase();
                write!(f, "{}", label.replace("freeze", "unfreeze"))
            },
            Self::Escalate(t) => write!(f, "escalate {}", t.label().to_ascii_lowercase()),
            Self::Query => f.write_str("query freeze events"),
            Self::Notify(t) => write!(f, "notify {}", t.label().to_ascii_lowercase()),
            Self::Purge => f.write_str("purge freeze events"),
        }
    }
}

/// Errors returned by freeze operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FreezeError {
    /// An existing event forbids applying this freeze.
    #[error("cannot apply {freeze_type}: account has {blocking}")]
    Blocked {
        /// The freeze that was refused.
        freeze_type: FreezeType,
        /// The event that refused it.
        blocking: FreezeType,
    },

    /// The account's status forbids applying this freeze.
    #[error("cannot apply {freeze_type}: account status is {status}")]
    StatusConflict {
        /// The freeze that was refused.
        freeze_type: FreezeType,
        /// The offending status.
        status: AccountStatus,
    },

    /// The targeted event does not exist.
    #[error("user is not {freeze_type} frozen: {account_id}")]
    NoFreezeStatus {
        /// The account.
        account_id: AccountId,
        /// The missing event type.
        freeze_type: FreezeType,
    },

    /// An event that must carry a snapshot has none.
    #[error("{freeze_type} event of {account_id} has no limits snapshot")]
    MissingSnapshot {
        /// The account.
        account_id: AccountId,
        /// The event type.
        freeze_type: FreezeType,
    },

    /// The event type cannot be escalated to a status.
    #[error("{freeze_type} does not escalate to an account status")]
    NotEscalatable {
        /// The event type.
        freeze_type: FreezeType,
    },

    /// A caller-supplied argument is invalid.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Why it is invalid.
        reason: String,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Context wrapper added by every public operation.
    #[error("{operation} failed for {account_id}: {source}")]
    Operation {
        /// The failed operation.
        operation: Operation,
        /// The account it targeted.
        account_id: AccountId,
        /// The underlying error.
        #[source]
        source: Box<FreezeError>,
    },
}

impl FreezeError {
    /// Creates a new no-such-freeze error.
    #[must_use]
    pub const fn no_freeze_status(account_id: AccountId, freeze_type: FreezeType) -> Self {
        Self::NoFreezeStatus {
            account_id,
            freeze_type,
        }
    }

    /// Creates a new missing snapshot error.
    #[must_use]
    pub const fn missing_snapshot(account_id: AccountId, freeze_type: FreezeType) -> Self {
        Self::MissingSnapshot {
            account_id,
            freeze_type,
        }
    }

    /// Creates a new invalid argument error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Wraps `self` with the operation and account it came from. Errors that
    /// already carry context are returned unchanged.
    #[must_use]
    pub fn in_operation(self, operation: Operation, account_id: AccountId) -> Self {
        match self {
            wrapped @ Self::Operation { .. } => wrapped,
            other => Self::Operation {
                operation,
                account_id,
                source: Box::new(other),
            },
        }
    }

    /// Returns the error beneath any operation context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the operation that failed, if recorded.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::Operation { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Returns `true` if the freeze was refused by the policy table.
    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self.root(),
            Self::Blocked { .. } | Self::StatusConflict { .. }
        )
    }

    /// Returns `true` if the targeted event does not exist.
    #[must_use]
    pub fn is_no_freeze_status(&self) -> bool {
        matches!(self.root(), Self::NoFreezeStatus { .. })
    }

    /// Returns `true` if the operation was cancelled before commit.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Store(StoreError::Cancelled))
    }

    /// Returns `true` if the error was caused by the request rather than by
    /// the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.error_class().is_client()
    }

    /// Returns the error classification for this error.
    #[must_use]
    pub fn error_class(&self) -> ErrorClass {
        match self.root() {
            Self::Blocked { .. } | Self::StatusConflict { .. } | Self::NotEscalatable { .. } => {
                ErrorClass::Policy
            },
            Self::NoFreezeStatus { .. } => ErrorClass::NotFound,
            Self::InvalidArgument { .. } => ErrorClass::Validation,
            Self::Store(StoreError::AccountNotFound(_)) => ErrorClass::NotFound,
            Self::Store(StoreError::Cancelled) => ErrorClass::Cancelled,
            Self::Store(_) => ErrorClass::Infrastructure,
            Self::MissingSnapshot { .. } | Self::Operation { .. } => ErrorClass::Internal,
        }
    }
}

/// Error classification for callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Refused by the policy table.
    Policy,
    /// The account or event does not exist.
    NotFound,
    /// Invalid input.
    Validation,
    /// Cancelled by the caller.
    Cancelled,
    /// Store failure.
    Infrastructure,
    /// Broken invariant.
    Internal,
}

impl ErrorClass {
    /// Returns `true` for classes caused by the request.
    #[must_use]
    pub const fn is_client(self) -> bool {
        matches!(
            self,
            Self::Policy | Self::NotFound | Self::Validation | Self::Cancelled
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy => write!(f, "policy"),
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
