//! Freeze, unfreeze and escalate commands.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use freezer_core::freeze::should_escalate;
use freezer_core::{AccountId, AccountStatus, FreezeEvent, FreezeType};
use serde::Serialize;
use tracing::info;

use super::{App, print_json};

#[derive(Debug, Serialize)]
struct Lifted {
    account_id: AccountId,
    freeze_type: FreezeType,
    status: AccountStatus,
}

#[derive(Debug, Serialize)]
struct Escalated {
    account_id: AccountId,
    escalated: Vec<FreezeType>,
}

/// Applies a freeze and prints the stored event.
pub fn freeze(
    app: &App,
    account_id: AccountId,
    freeze_type: FreezeType,
    days: Option<i64>,
) -> Result<()> {
    print_json(&apply(app, account_id, freeze_type, days)?)
}

/// Lifts a freeze and prints the account's resulting status.
pub fn unfreeze(app: &App, account_id: AccountId, freeze_type: FreezeType) -> Result<()> {
    app.service
        .unfreeze(account_id, freeze_type)
        .with_context(|| format!("failed to lift {freeze_type} from {account_id}"))?;
    let account = app.store.account(account_id)?;
    print_json(&Lifted {
        account_id,
        freeze_type,
        status: account.status,
    })
}

/// Escalates overdue events of an account, or the event of `forced`
/// regardless of its countdown, and prints what was escalated.
pub fn escalate(
    app: &App,
    account_id: AccountId,
    forced: Option<FreezeType>,
    now: DateTime<Utc>,
) -> Result<()> {
    let escalated = escalate_events(app, account_id, forced, now)?;
    print_json(&Escalated {
        account_id,
        escalated,
    })
}

fn apply(
    app: &App,
    account_id: AccountId,
    freeze_type: FreezeType,
    days: Option<i64>,
) -> Result<FreezeEvent> {
    let event = match (freeze_type, days) {
        (FreezeType::DelayedBotFreeze, days) => {
            app.service.delayed_bot_freeze_user(account_id, days)
        },
        (_, Some(_)) => bail!("--days only applies to delayed bot freezes"),
        (_, None) => app.service.freeze(account_id, freeze_type),
    };
    event.with_context(|| format!("failed to apply {freeze_type} to {account_id}"))
}

fn escalate_events(
    app: &App,
    account_id: AccountId,
    forced: Option<FreezeType>,
    now: DateTime<Utc>,
) -> Result<Vec<FreezeType>> {
    let events = app.service.get_all(account_id)?;
    let due: Vec<FreezeEvent> = match forced {
        Some(freeze_type) => match events.get(freeze_type) {
            Some(event) => vec![event.clone()],
            None => bail!("{account_id} has no {freeze_type} event"),
        },
        None => events
            .iter()
            .filter(|event| should_escalate(event, now))
            .cloned()
            .collect(),
    };

    let mut escalated = Vec::with_capacity(due.len());
    for event in &due {
        app.service
            .escalate(account_id, event)
            .with_context(|| format!("failed to escalate {} of {account_id}", event.freeze_type))?;
        info!(%account_id, freeze_type = %event.freeze_type, "escalated");
        escalated.push(event.freeze_type);
    }
    Ok(escalated)
}
