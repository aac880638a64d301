//! Account and project seeding.

use anyhow::{Context, Result};
use freezer_core::account::{NewAccount, NewProject};
use freezer_core::limits::{RateLimits, UsageLimits};
use freezer_core::{Account, AccountId};

use super::{App, print_json};

/// Creates an active account and prints it.
pub fn add(app: &App, email: &str, storage: i64, bandwidth: i64, segment: i64) -> Result<()> {
    print_json(&create_account(app, email, storage, bandwidth, segment)?)
}

/// Creates a project and prints it.
pub fn add_project(
    app: &App,
    owner: AccountId,
    name: &str,
    [storage, bandwidth, segment]: [i64; 3],
    rate: Option<i64>,
    burst: Option<i64>,
) -> Result<()> {
    let project = app
        .store
        .create_project(
            &NewProject::new(owner, name, UsageLimits::new(storage, bandwidth, segment))
                .with_rate(RateLimits::new(rate, burst)),
        )
        .with_context(|| format!("failed to create project {name} for {owner}"))?;
    print_json(&project)
}

pub(super) fn create_account(
    app: &App,
    email: &str,
    storage: i64,
    bandwidth: i64,
    segment: i64,
) -> Result<Account> {
    app.store
        .create_account(&NewAccount::active(
            email,
            UsageLimits::new(storage, bandwidth, segment),
        ))
        .with_context(|| format!("failed to create account {email}"))
}

#[cfg(test)]
pub(super) fn create_project(app: &App, owner: AccountId) -> Result<freezer_core::Project> {
    Ok(app.store.create_project(
        &NewProject::new(owner, "default", UsageLimits::new(500, 500, 10))
            .with_rate(RateLimits::new(Some(100), Some(100))),
    )?)
}
