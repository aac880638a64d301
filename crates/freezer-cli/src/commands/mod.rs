//! Command implementations.
//!
//! Each command opens the configured database, performs one operation and
//! prints its result as JSON on stdout.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use freezer_core::{AccountFreezeService, FreezerConfig, LogTracker, SqliteStore};
use serde::Serialize;
use tracing::debug;

pub mod account;
pub mod freeze;
pub mod query;

/// Store and service shared by every command.
pub struct App {
    pub store: SqliteStore,
    pub service: AccountFreezeService<SqliteStore>,
}

impl App {
    /// Opens the database named in `config`.
    pub fn open(config: &FreezerConfig) -> Result<Self> {
        let path = &config.database.path;
        let store = SqliteStore::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        debug!(path = %path.display(), "opened database");
        let service = AccountFreezeService::new(
            store.clone(),
            Arc::new(LogTracker),
            config.account_freeze,
        );
        Ok(Self { store, service })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let store = SqliteStore::in_memory()?;
        let service = AccountFreezeService::new(
            store.clone(),
            Arc::new(freezer_core::NoopTracker),
            freezer_core::FreezeConfig::default(),
        );
        Ok(Self { store, service })
    }
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("failed to write JSON output")?;
    writeln!(out).context("failed to write JSON output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn open_creates_database_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("freezer.db");
        let config = FreezerConfig::from_toml(&format!(
            "[database]\npath = {:?}\n\n[account_freeze]\nbilling_warn_grace_period = \"7days\"\n",
            path.display().to_string()
        ))
        .unwrap();

        let app = App::open(&config).unwrap();
        assert!(path.exists());
        assert_eq!(app.service.config().billing_warn_grace_days(), 7);

        let account = account::create_account(&app, "a@example.com", 10, 10, 1).unwrap();
        let warning = app.service.billing_warn_user(account.id).unwrap();
        assert_eq!(warning.days_till_escalation, Some(7));
    }
}
