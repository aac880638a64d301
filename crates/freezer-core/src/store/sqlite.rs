//! `SQLite`-backed store.
//!
//! Writers take the database lock at `BEGIN IMMEDIATE`, so two freeze
//! operations on the same account serialize instead of interleaving their
//! read-modify-write cycles.

// Row counts returned by SQLite are never negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Cancellation, DbTx, FreezeDb, StoreError};
use crate::account::{
    Account, AccountId, AccountStatus, NewAccount, NewProject, Project, ProjectId,
};
use crate::freeze::{
    AccountFreezeEvents, EscalatedEvent, EscalatedEventsQuery, FreezeEvent, FreezeEventsCursor,
    FreezeEventsPage, FreezeType,
};
use crate::limits::{FreezeEventLimits, ProjectLimitsUpdate, RateLimits, UsageLimits};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// How long a writer waits for the database lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ACCOUNT_COLUMNS: &str = "id, email, status, project_storage_limit, \
     project_bandwidth_limit, project_segment_limit, status_updated_at, created_at";

const PROJECT_COLUMNS: &str = "id, owner_id, name, storage_limit, bandwidth_limit, \
     segment_limit, user_specified_storage_limit, user_specified_bandwidth_limit, \
     rate_limit, burst_limit";

const EVENT_COLUMNS: &str =
    "user_id, event, limits, days_till_escalation, notifications_count, created_at";

/// A store backed by a single `SQLite` connection.
///
/// Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens or creates a store at `path` in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.display(), journal_mode = %mode, "opened freeze store");
        Self::initialize_connection(conn)
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::initialize_connection(Connection::open_in_memory()?)
    }

    fn initialize_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// Returns a database error if the insert fails, e.g. on a duplicate id.
    pub fn create_account(&self, new: &NewAccount) -> Result<Account, StoreError> {
        let conn = self.lock()?;
        let id = new.id.unwrap_or_else(AccountId::new_v4);
        let now = Utc::now();
        conn.execute(
            "INSERT INTO accounts (id, email, status, project_storage_limit,
                 project_bandwidth_limit, project_segment_limit, status_updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                new.email,
                new.status.code(),
                new.owner_limits.storage,
                new.owner_limits.bandwidth,
                new.owner_limits.segment,
                encode_time(now),
            ],
        )?;
        debug!(account_id = %id, "created account");
        SqliteTx::new(&conn).account(id)
    }

    /// Creates a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if the owner does not exist.
    pub fn create_project(&self, new: &NewProject) -> Result<Project, StoreError> {
        let conn = self.lock()?;
        let tx = SqliteTx::new(&conn);
        tx.account(new.owner_id)?;

        let id = new.id.unwrap_or_else(ProjectId::new_v4);
        conn.execute(
            "INSERT INTO projects (id, owner_id, name, storage_limit, bandwidth_limit,
                 segment_limit, rate_limit, burst_limit, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                new.owner_id.to_string(),
                new.name,
                new.usage.storage,
                new.usage.bandwidth,
                new.usage.segment,
                new.rate.rate_limit,
                new.rate.burst_limit,
                encode_time(Utc::now()),
            ],
        )?;
        debug!(project_id = %id, owner_id = %new.owner_id, "created project");
        tx.project(id)
    }

    /// Creates a web session for an account, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if the account does not exist.
    pub fn create_session(
        &self,
        account_id: AccountId,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let conn = self.lock()?;
        SqliteTx::new(&conn).account(account_id)?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO webapp_sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![id, account_id.to_string(), encode_time(expires_at)],
        )?;
        Ok(id)
    }

    /// Reads an account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccountNotFound`] if it does not exist.
    pub fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        let conn = self.lock()?;
        SqliteTx::new(&conn).account(id)
    }

    /// Reads a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] if it does not exist.
    pub fn project(&self, id: ProjectId) -> Result<Project, StoreError> {
        let conn = self.lock()?;
        SqliteTx::new(&conn).project(id)
    }

    /// Lists the projects owned by an account.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub fn projects(&self, owner: AccountId) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;
        SqliteTx::new(&conn).owned_projects(owner)
    }

    /// Overwrites a project's live limits outside of any freeze.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] if it does not exist.
    pub fn set_project_limits(
        &self,
        id: ProjectId,
        update: &ProjectLimitsUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if SqliteTx::new(&conn).update_project_limits(id, update)? {
            Ok(())
        } else {
            Err(StoreError::ProjectNotFound(id))
        }
    }

    /// Counts the web sessions of an account.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn session_count(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM webapp_sessions WHERE user_id = ?1",
            params![account_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl FreezeDb for SqliteStore {
    fn with_tx<T, E, F>(&self, cancel: &Cancellation, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&dyn DbTx) -> Result<T, E>,
    {
        cancel.check()?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        // Dropping `tx` on the error path rolls back.
        let value = f(&SqliteTx::new(&tx))?;

        if let Err(cancelled) = cancel.check() {
            tx.rollback().map_err(StoreError::from)?;
            debug!("transaction cancelled before commit; rolled back");
            return Err(cancelled.into());
        }

        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

/// [`DbTx`] over a borrowed connection or open transaction.
struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTx<'a> {
    const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id.to_string()],
                ProjectRow::from_row,
            )
            .optional()?
            .ok_or(StoreError::ProjectNotFound(id))?
            .decode()
    }
}

impl DbTx for SqliteTx<'_> {
    fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
                AccountRow::from_row,
            )
            .optional()?
            .ok_or(StoreError::AccountNotFound(id))?
            .decode()
    }

    fn update_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET status = ?2, status_updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.code(), encode_time(at)],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    fn update_owner_limits(&self, id: AccountId, limits: UsageLimits) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET project_storage_limit = ?2, project_bandwidth_limit = ?3,
                 project_segment_limit = ?4
             WHERE id = ?1",
            params![id.to_string(), limits.storage, limits.bandwidth, limits.segment],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(id));
        }
        Ok(())
    }

    fn owned_projects(&self, owner: AccountId) -> Result<Vec<Project>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![owner.to_string()], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ProjectRow::decode).collect()
    }

    fn update_project_limits(
        &self,
        id: ProjectId,
        update: &ProjectLimitsUpdate,
    ) -> Result<bool, StoreError> {
        let changed = match update.rate {
            Some(rate) => self.conn.execute(
                "UPDATE projects SET storage_limit = ?2, bandwidth_limit = ?3,
                     segment_limit = ?4, user_specified_storage_limit = ?5,
                     user_specified_bandwidth_limit = ?6, rate_limit = ?7, burst_limit = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.usage.storage,
                    update.usage.bandwidth,
                    update.usage.segment,
                    update.user_set_storage,
                    update.user_set_bandwidth,
                    rate.rate_limit,
                    rate.burst_limit,
                ],
            )?,
            None => self.conn.execute(
                "UPDATE projects SET storage_limit = ?2, bandwidth_limit = ?3,
                     segment_limit = ?4, user_specified_storage_limit = ?5,
                     user_specified_bandwidth_limit = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.usage.storage,
                    update.usage.bandwidth,
                    update.usage.segment,
                    update.user_set_storage,
                    update.user_set_bandwidth,
                ],
            )?,
        };
        Ok(changed > 0)
    }

    fn delete_sessions(&self, owner: AccountId) -> Result<u64, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM webapp_sessions WHERE user_id = ?1",
            params![owner.to_string()],
        )?;
        Ok(deleted as u64)
    }

    fn freeze_event(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<Option<FreezeEvent>, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM account_freeze_events
                     WHERE user_id = ?1 AND event = ?2"
                ),
                params![account_id.to_string(), freeze_type.code()],
                EventRow::from_row,
            )
            .optional()?
            .map(EventRow::decode)
            .transpose()
    }

    fn freeze_events(&self, account_id: AccountId) -> Result<AccountFreezeEvents, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM account_freeze_events WHERE user_id = ?1"
        ))?;
        let rows = stmt
            .query_map(params![account_id.to_string()], EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::decode).collect()
    }

    fn upsert_freeze_event(&self, event: &FreezeEvent) -> Result<FreezeEvent, StoreError> {
        let limits = event
            .limits
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let row = self.conn.query_row(
            &format!(
                "INSERT INTO account_freeze_events
                     (user_id, event, limits, days_till_escalation, notifications_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (user_id, event) DO UPDATE SET
                     limits = excluded.limits,
                     days_till_escalation = excluded.days_till_escalation,
                     notifications_count = excluded.notifications_count
                 RETURNING {EVENT_COLUMNS}"
            ),
            params![
                event.account_id.to_string(),
                event.freeze_type.code(),
                limits,
                event.days_till_escalation,
                event.notifications_count,
                encode_time(event.created_at),
            ],
            EventRow::from_row,
        )?;
        row.decode()
    }

    fn delete_freeze_event(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM account_freeze_events WHERE user_id = ?1 AND event = ?2",
            params![account_id.to_string(), freeze_type.code()],
        )?;
        Ok(deleted > 0)
    }

    fn delete_freeze_events(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM account_freeze_events WHERE user_id = ?1",
            params![account_id.to_string()],
        )?;
        Ok(deleted as u64)
    }

    fn increment_notifications_count(
        &self,
        account_id: AccountId,
        freeze_type: FreezeType,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE account_freeze_events SET notifications_count = notifications_count + 1
             WHERE user_id = ?1 AND event = ?2",
            params![account_id.to_string(), freeze_type.code()],
        )?;
        Ok(changed > 0)
    }

    fn list_freeze_events(
        &self,
        cursor: &FreezeEventsCursor,
        types: &[FreezeType],
    ) -> Result<FreezeEventsPage, StoreError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        if let Some(after) = cursor.starting_after {
            clauses.push("(user_id > ? OR (user_id = ? AND event > ?))".to_string());
            args.push(Value::Text(after.account_id.to_string()));
            args.push(Value::Text(after.account_id.to_string()));
            args.push(Value::Integer(after.freeze_type.code()));
        }
        if !types.is_empty() {
            let placeholders = vec!["?"; types.len()].join(", ");
            clauses.push(format!("event IN ({placeholders})"));
            args.extend(types.iter().map(|t| Value::Integer(t.code())));
        }
        args.push(Value::Integer(
            i64::try_from(cursor.limit.saturating_add(1)).unwrap_or(i64::MAX),
        ));

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM account_freeze_events {filter}
             ORDER BY user_id, event LIMIT ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let next = rows.len() > cursor.limit;
        let events = rows
            .into_iter()
            .take(cursor.limit)
            .map(EventRow::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FreezeEventsPage { events, next })
    }

    fn escalated_events_before(
        &self,
        queries: &[EscalatedEventsQuery],
        limit: usize,
    ) -> Result<Vec<EscalatedEvent>, StoreError> {
        if queries.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut args = vec![AccountStatus::PendingDeletion.code()];
        let mut alternatives = Vec::with_capacity(queries.len());
        for query in queries {
            alternatives.push("(e.event = ? AND a.status_updated_at < ?)");
            args.push(query.freeze_type.code());
            args.push(encode_time(query.older_than));
        }
        args.push(i64::try_from(limit).unwrap_or(i64::MAX));

        let mut stmt = self.conn.prepare(&format!(
            "SELECT e.user_id, e.event, a.status_updated_at
             FROM account_freeze_events e
             JOIN accounts a ON a.id = e.user_id
             WHERE a.status = ? AND ({})
             ORDER BY a.status_updated_at, e.user_id, e.event
             LIMIT ?",
            alternatives.join(" OR ")
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, event, status_updated_at)| {
                Ok(EscalatedEvent {
                    account_id: decode_id("user_id", &user_id)?,
                    freeze_type: decode_freeze_type(event)?,
                    status_updated_at: decode_time("status_updated_at", status_updated_at)?,
                })
            })
            .collect()
    }
}

struct AccountRow {
    id: String,
    email: String,
    status: i64,
    owner_limits: UsageLimits,
    status_updated_at: i64,
    created_at: i64,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            status: row.get(2)?,
            owner_limits: UsageLimits::new(row.get(3)?, row.get(4)?, row.get(5)?),
            status_updated_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Account, StoreError> {
        Ok(Account {
            id: decode_id("accounts.id", &self.id)?,
            email: self.email,
            status: AccountStatus::from_code(self.status)
                .ok_or_else(|| StoreError::corrupt("accounts.status", self.status))?,
            owner_limits: self.owner_limits,
            status_updated_at: decode_time("accounts.status_updated_at", self.status_updated_at)?,
            created_at: decode_time("accounts.created_at", self.created_at)?,
        })
    }
}

struct ProjectRow {
    id: String,
    owner_id: String,
    name: String,
    usage: UsageLimits,
    user_set_storage: Option<i64>,
    user_set_bandwidth: Option<i64>,
    rate: RateLimits,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            usage: UsageLimits::new(row.get(3)?, row.get(4)?, row.get(5)?),
            user_set_storage: row.get(6)?,
            user_set_bandwidth: row.get(7)?,
            rate: RateLimits::new(row.get(8)?, row.get(9)?),
        })
    }

    fn decode(self) -> Result<Project, StoreError> {
        Ok(Project {
            id: decode_id("projects.id", &self.id)?,
            owner_id: decode_id("projects.owner_id", &self.owner_id)?,
            name: self.name,
            usage: self.usage,
            user_set_storage: self.user_set_storage,
            user_set_bandwidth: self.user_set_bandwidth,
            rate: self.rate,
        })
    }
}

struct EventRow {
    user_id: String,
    event: i64,
    limits: Option<String>,
    days_till_escalation: Option<i64>,
    notifications_count: i64,
    created_at: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            event: row.get(1)?,
            limits: row.get(2)?,
            days_till_escalation: row.get(3)?,
            notifications_count: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<FreezeEvent, StoreError> {
        let limits = self
            .limits
            .as_deref()
            .map(serde_json::from_str::<FreezeEventLimits>)
            .transpose()?;
        Ok(FreezeEvent {
            account_id: decode_id("account_freeze_events.user_id", &self.user_id)?,
            freeze_type: decode_freeze_type(self.event)?,
            limits,
            days_till_escalation: self.days_till_escalation,
            notifications_count: self.notifications_count,
            created_at: decode_time("account_freeze_events.created_at", self.created_at)?,
        })
    }
}

fn encode_time(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn decode_time(column: &'static str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::corrupt(column, micros))
}

fn decode_id<T: FromStr>(column: &'static str, value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|_| StoreError::corrupt(column, value))
}

fn decode_freeze_type(code: i64) -> Result<FreezeType, StoreError> {
    FreezeType::from_code(code).ok_or_else(|| StoreError::corrupt("account_freeze_events.event", code))
}
