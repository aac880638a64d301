//! Read-only commands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use freezer_core::freeze::{EventKey, FreezeEventsCursor, should_escalate};
use freezer_core::{Account, AccountId, FreezeEvent, FreezeType, Project};
use serde::Serialize;

use super::{App, print_json};

const DUE_PAGE_SIZE: usize = 500;

#[derive(Debug, Serialize)]
struct Status {
    account: Account,
    projects: Vec<Project>,
    events: Vec<FreezeEvent>,
}

#[derive(Debug, Serialize)]
struct Listing {
    events: Vec<FreezeEvent>,
    next: Option<EventKey>,
}

/// Prints an account, its projects and its freeze events.
pub fn status(app: &App, account_id: AccountId) -> Result<()> {
    let account = app
        .store
        .account(account_id)
        .with_context(|| format!("failed to read account {account_id}"))?;
    let projects = app.store.projects(account_id)?;
    let events = app.service.get_all(account_id)?.iter().cloned().collect();
    print_json(&Status {
        account,
        projects,
        events,
    })
}

/// Prints one page of the global event listing.
///
/// `after` starts the page after every event of that account.
pub fn list(
    app: &App,
    types: &[FreezeType],
    after: Option<AccountId>,
    limit: usize,
) -> Result<()> {
    print_json(&list_page(app, types, after, limit)?)
}

/// Prints every event whose grace period had elapsed at `now`.
pub fn due(app: &App, now: DateTime<Utc>) -> Result<()> {
    print_json(&due_events(app, now)?)
}

fn list_page(
    app: &App,
    types: &[FreezeType],
    after: Option<AccountId>,
    limit: usize,
) -> Result<Listing> {
    let last_type = FreezeType::ALL[FreezeType::ALL.len() - 1];
    let cursor = FreezeEventsCursor {
        limit,
        starting_after: after.map(|account_id| EventKey {
            account_id,
            freeze_type: last_type,
        }),
    };
    let page = app
        .service
        .get_all_events(&cursor, types)
        .context("failed to list freeze events")?;
    let next = page.next_cursor(limit).and_then(|c| c.starting_after);
    Ok(Listing {
        events: page.events,
        next,
    })
}

fn due_events(app: &App, now: DateTime<Utc>) -> Result<Vec<FreezeEvent>> {
    let escalating: Vec<FreezeType> = FreezeType::ALL
        .into_iter()
        .filter(|t| t.policy().escalates())
        .collect();

    let mut due = Vec::new();
    let mut cursor = FreezeEventsCursor::first(DUE_PAGE_SIZE);
    loop {
        let page = app
            .service
            .get_all_events(&cursor, &escalating)
            .context("failed to list freeze events")?;
        due.extend(
            page.events
                .iter()
                .filter(|event| should_escalate(event, now))
                .cloned(),
        );
        match page.next_cursor(DUE_PAGE_SIZE) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    Ok(due)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::commands::account::create_account;

    #[test]
    fn list_starts_after_account() {
        let app = App::in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..3 {
            let account = create_account(&app, &format!("u{i}@example.com"), 10, 10, 1).unwrap();
            app.service.billing_warn_user(account.id).unwrap();
            app.service.delayed_bot_freeze_user(account.id, None).unwrap();
            ids.push(account.id);
        }
        ids.sort();

        let first = list_page(&app, &[], None, 4).unwrap();
        assert_eq!(first.events.len(), 4);
        assert_eq!(
            first.next,
            Some(EventKey {
                account_id: ids[1],
                freeze_type: FreezeType::DelayedBotFreeze,
            })
        );

        let rest = list_page(&app, &[], Some(ids[0]), 10).unwrap();
        assert!(rest.events.iter().all(|e| e.account_id != ids[0]));
        assert_eq!(rest.events.len(), 4);
        assert_eq!(rest.next, None);

        let warnings = list_page(&app, &[FreezeType::BillingWarning], None, 10).unwrap();
        assert_eq!(warnings.events.len(), 3);
    }

    #[test]
    fn due_lists_only_overdue_escalating_events() {
        let app = App::in_memory().unwrap();
        let warned = create_account(&app, "w@example.com", 10, 10, 1).unwrap();
        let legal = create_account(&app, "l@example.com", 10, 10, 1).unwrap();
        app.service.billing_warn_user(warned.id).unwrap();
        app.service.legal_freeze_user(legal.id).unwrap();

        assert!(due_events(&app, Utc::now()).unwrap().is_empty());

        let later = due_events(&app, Utc::now() + Duration::days(16)).unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].account_id, warned.id);
        assert_eq!(later[0].freeze_type, FreezeType::BillingWarning);
    }
}
