//! # freezer-core
//!
//! Account suspension ("freeze") state machine for a storage control plane.
//!
//! A freeze suspends a tenant account by zeroing the resource ceilings of the
//! account and every project it owns, after capturing them so that lifting
//! the freeze restores them exactly. Several independent reasons can be
//! stacked on one account:
//!
//! - **Billing**: nonpayment, preceded by a billing warning
//! - **Violation**: terms-of-service violation
//! - **Legal**: legal review
//! - **Bot**: automated bot review, optionally scheduled after a delay
//! - **Trial expiration**: the free trial ran out
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use freezer_core::account::NewAccount;
//! use freezer_core::config::FreezeConfig;
//! use freezer_core::limits::UsageLimits;
//! use freezer_core::store::SqliteStore;
//! use freezer_core::tracker::NoopTracker;
//! use freezer_core::AccountFreezeService;
//!
//! let store = SqliteStore::in_memory().unwrap();
//! let account = store
//!     .create_account(&NewAccount::active("owner@example.com", UsageLimits::new(100, 100, 10)))
//!     .unwrap();
//!
//! let service = AccountFreezeService::new(store.clone(), Arc::new(NoopTracker), FreezeConfig::default());
//! service.billing_freeze_user(account.id).unwrap();
//! assert!(store.account(account.id).unwrap().owner_limits.is_zero());
//!
//! service.billing_unfreeze_user(account.id).unwrap();
//! assert_eq!(store.account(account.id).unwrap().owner_limits, UsageLimits::new(100, 100, 10));
//! ```
//!
//! ## Layout
//!
//! - [`freeze`]: freeze types, the policy table, snapshot and restore engines
//!   and [`AccountFreezeService`]
//! - [`store`]: the transactional persistence seam and its `SQLite`
//!   implementation
//! - [`tracker`]: post-commit notifications
//! - [`config`]: TOML configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod config;
pub mod freeze;
pub mod limits;
pub mod store;
pub mod tracker;

pub use account::{Account, AccountId, AccountStatus, Project, ProjectId};
pub use config::{ConfigError, FreezeConfig, FreezerConfig};
pub use freeze::{AccountFreezeService, FreezeError, FreezeEvent, FreezeType};
pub use limits::{FreezeEventLimits, ProjectSnapshot, UsageLimits};
pub use store::{Cancellation, FreezeDb, SqliteStore, StoreError};
pub use tracker::{FreezeTracker, LogTracker, NoopTracker};
