//! Persistence for accounts, projects, sessions and freeze events.
//!
//! Freeze operations never talk to a database directly. They run a closure
//! against a [`DbTx`] handed out by [`FreezeDb::with_tx`]; the closure either
//! returns `Ok` and the unit of work commits, or returns `Err` and every write
//! it made is rolled back. [`SqliteStore`] is the provided implementation.

mod sqlite;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
pub use sqlite::SqliteStore;
use thiserror::Error;

use crate::account::{Account, AccountId, AccountStatus, Project, ProjectId};
use crate::freeze::{
    AccountFreezeEvents, EscalatedEvent, EscalatedEventsQuery, FreezeEvent, FreezeEventsCursor,
    FreezeEventsPage, FreezeType,
};
use crate::limits::{ProjectLimitsUpdate, UsageLimits};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A limits snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The project does not exist.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// The unit of work was cancelled and rolled back.
    #[error("operation cancelled")]
    Cancelled,

    /// The connection mutex was poisoned by a panicking holder.
    #[error("connection lock poisoned")]
    LockPoisoned,

    /// A stored row holds a value this version does not understand.
    #[error("corrupt {column} value: {value}")]
    CorruptRow {
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: String,
    },
}

impl StoreError {
    /// Creates a new corrupt row error.
    #[must_use]
    pub fn corrupt(column: &'static str, value: impl ToString) -> Self {
        Self::CorruptRow {
            column,
            value: value.to_string(),
        }
    }
}

/// Shared cancellation flag for in-flight units of work.
///
/// Cloning yields a handle to the same flag. The store checks it before a
/// transaction begins and again before it commits.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Creates a flag that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns [`StoreError::Cancelled`] if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the flag is set.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Reads and writes available inside one unit of work.
pub trait DbTx {
    /// Reads an account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if it does not exist.
    fn account(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Sets an account's status and stamps `status_updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if it does not exist.
    fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Overwrites an account's default project ceilings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if it does not exist.
    fn update_owner_limits(&self, id: AccountId, limits: UsageLimits) -> Result<(), StoreError>;

    /// Lists the projects owned by an account, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    fn owned_projects(&self, owner: AccountId) -> Result<Vec<Project>, StoreError>;

    /// Writes a project's live limits. Returns `false` if the project does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    fn update_project_limits(
        &self,
        id: ProjectId,
        update: &ProjectLimitsUpdate,
    ) -> Result<bool, StoreError>;

    /// Deletes every web session of an account, returning how many.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails.
    fn delete_sessions(&self, owner: AccountId) -> Result<u64, StoreError>;

    /// Reads one freeze event.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or the row is corrupt.
    fn freeze_event(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<Option<FreezeEvent>, StoreError>;

    /// Reads all freeze events of an account.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or a row is corrupt.
    fn freeze_events(&self, account_id: AccountId) -> Result<AccountFreezeEvents, StoreError>;

    /// Inserts or updates an event. On update the limits, countdown and
    /// notification count are overwritten; `created_at` is kept. Returns the
    /// stored row.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn upsert_freeze_event(&self, event: &FreezeEvent) -> Result<FreezeEvent, StoreError>;

    /// Deletes one event, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails.
    fn delete_freeze_event(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<bool, StoreError>;

    /// Deletes every event of an account, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails.
    fn delete_freeze_events(&self, account_id: AccountId) -> Result<u64, StoreError>;

    /// Adds one to an event's notification count, returning whether the
    /// event existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    fn increment_notifications_count(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<bool, StoreError>;

    /// Lists events ordered by account id then type code, starting after the
    /// cursor. An empty `types` slice selects every type.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or a row is corrupt.
    fn list_freeze_events(
        &self,
        cursor: &FreezeEventsCursor,
        types: &[FreezeType],
    ) -> Result<FreezeEventsPage, StoreError>;

    /// Lists events matching any query whose account is pending deletion,
    /// ordered by the account's `status_updated_at`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails or a row is corrupt.
    fn escalated_events_before(
        &self,
        queries: &[EscalatedEventsQuery],
        limit: usize,
    ) -> Result<Vec<EscalatedEvent>, StoreError>;
}

/// A database that runs closures inside atomic units of work.
pub trait FreezeDb: Send + Sync {
    /// Runs `f` inside one transaction.
    ///
    /// The transaction commits only if `f` returns `Ok` and `cancel` is still
    /// clear; otherwise it rolls back.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a store error converted into `E` if
    /// the transaction cannot begin or commit or was cancelled.
    fn with_tx<T, E, F>(&self, cancel: &Cancellation, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&dyn DbTx) -> Result<T, E>;
}
