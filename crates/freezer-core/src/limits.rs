//! Resource ceiling value types.
//!
//! [`UsageLimits`] is the enforceable triple (storage, bandwidth, segments)
//! carried by accounts (as the default for their projects) and by projects
//! (as the live ceiling the data plane checks). An all-zero triple is the
//! suspension sentinel: live accounts and projects always carry positive
//! ceilings until a freeze zeroes them.
//!
//! [`ProjectSnapshot`] and [`FreezeEventLimits`] are the captured pre-freeze
//! values stored inside a freeze event so the freeze can be reversed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::{Project, ProjectId};

/// The enforceable storage/bandwidth/segment ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageLimits {
    /// Maximum stored bytes.
    pub storage: i64,
    /// Maximum egress bytes per billing period.
    pub bandwidth: i64,
    /// Maximum number of segments.
    pub segment: i64,
}

impl UsageLimits {
    /// The suspension sentinel.
    pub const ZERO: Self = Self {
        storage: 0,
        bandwidth: 0,
        segment: 0,
    };

    /// Creates a new set of limits.
    #[must_use]
    pub const fn new(storage: i64, bandwidth: i64, segment: i64) -> Self {
        Self {
            storage,
            bandwidth,
            segment,
        }
    }

    /// Returns `true` if every ceiling is zero, i.e. the owner is currently
    /// suspended by some freeze.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.storage == 0 && self.bandwidth == 0 && self.segment == 0
    }
}

/// Request-rate ceilings of a project. `None` means the satellite default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimits {
    /// Requests per second.
    pub rate_limit: Option<i64>,
    /// Burst allowance.
    pub burst_limit: Option<i64>,
}

impl RateLimits {
    /// Rate limits that block every request.
    pub const ZERO: Self = Self {
        rate_limit: Some(0),
        burst_limit: Some(0),
    };

    /// Creates new rate limits.
    #[must_use]
    pub const fn new(rate_limit: Option<i64>, burst_limit: Option<i64>) -> Self {
        Self {
            rate_limit,
            burst_limit,
        }
    }
}

/// Captured pre-freeze limits of a single project.
///
/// The usage triple and the user-specified ceilings always travel together.
/// Rate and burst limits live in separate columns of the project row; they are
/// captured only when non-zero, because a zero value may itself be the result
/// of an earlier freeze.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    /// Storage/bandwidth/segment ceilings.
    #[serde(flatten)]
    pub usage: UsageLimits,

    /// Storage ceiling the project owner chose below the granted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_set_storage: Option<i64>,

    /// Bandwidth ceiling the project owner chose below the granted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_set_bandwidth: Option<i64>,

    /// Captured non-zero rate limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<i64>,

    /// Captured non-zero burst limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<i64>,

    /// Set once a freeze holding this snapshot has zeroed the live rate and
    /// burst columns; restoring must then write them back even when nothing
    /// was captured.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rate_limits_zeroed: bool,
}

impl ProjectSnapshot {
    /// Captures the live usage ceilings of `project`.
    ///
    /// Rate limits are not captured here; see
    /// [`ProjectSnapshot::carry_rate_limits`].
    #[must_use]
    pub const fn from_live(project: &Project) -> Self {
        Self {
            usage: project.usage,
            user_set_storage: project.user_set_storage,
            user_set_bandwidth: project.user_set_bandwidth,
            rate_limit: None,
            burst_limit: None,
            rate_limits_zeroed: false,
        }
    }

    /// Returns `true` if the captured ceilings carry the suspension sentinel.
    #[must_use]
    pub const fn is_zeroed(&self) -> bool {
        self.usage.is_zero() && self.user_set_storage.is_none() && self.user_set_bandwidth.is_none()
    }

    /// Copies the non-zero live rate and burst limits into this snapshot.
    pub fn carry_rate_limits(&mut self, live: RateLimits) {
        if let Some(rate) = live.rate_limit.filter(|v| *v != 0) {
            self.rate_limit = Some(rate);
        }
        if let Some(burst) = live.burst_limit.filter(|v| *v != 0) {
            self.burst_limit = Some(burst);
        }
    }

    /// Returns `true` if restoring this snapshot must write the rate and
    /// burst columns.
    #[must_use]
    pub const fn restores_rate_limits(&self) -> bool {
        self.rate_limits_zeroed || self.rate_limit.is_some() || self.burst_limit.is_some()
    }

    /// The rate limits to write back on restore.
    #[must_use]
    pub const fn rate_limits(&self) -> RateLimits {
        RateLimits::new(self.rate_limit, self.burst_limit)
    }
}

/// The captured pre-freeze limits of an account and all projects it owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeEventLimits {
    /// The account's default per-project ceilings.
    pub user: UsageLimits,
    /// Per-project snapshots, keyed by project id.
    #[serde(default)]
    pub projects: BTreeMap<ProjectId, ProjectSnapshot>,
}

impl FreezeEventLimits {
    /// Creates a snapshot holding only account-level limits.
    #[must_use]
    pub const fn for_user(user: UsageLimits) -> Self {
        Self {
            user,
            projects: BTreeMap::new(),
        }
    }

    /// Fills the gaps of this snapshot from `other`: the account limits when
    /// these are the sentinel, and every project this snapshot lacks.
    pub fn fill_from(&mut self, other: &Self) {
        if self.user.is_zero() {
            self.user = other.user;
        }
        for (project_id, entry) in &other.projects {
            self.projects.entry(*project_id).or_insert(*entry);
        }
    }

    /// Folds `snapshots` into one, earlier snapshots taking precedence.
    /// Returns `None` if there is nothing to fold.
    #[must_use]
    pub fn merged<'a>(snapshots: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        snapshots.into_iter().fold(None, |merged, next| match merged {
            None => Some(next.clone()),
            Some(mut merged) => {
                merged.fill_from(next);
                Some(merged)
            },
        })
    }
}

/// A write to a project's live limits.
///
/// `rate` of `None` leaves the rate and burst columns untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectLimitsUpdate {
    /// New usage ceilings.
    pub usage: UsageLimits,
    /// New user-specified storage ceiling.
    pub user_set_storage: Option<i64>,
    /// New user-specified bandwidth ceiling.
    pub user_set_bandwidth: Option<i64>,
    /// New rate limits, if they are to be written.
    pub rate: Option<RateLimits>,
}

impl ProjectLimitsUpdate {
    /// The update that suspends a project.
    #[must_use]
    pub const fn zeroed(zero_rate_limits: bool) -> Self {
        Self {
            usage: UsageLimits::ZERO,
            user_set_storage: None,
            user_set_bandwidth: None,
            rate: if zero_rate_limits {
                Some(RateLimits::ZERO)
            } else {
                None
            },
        }
    }

    /// The update that writes `snapshot` back onto a project.
    #[must_use]
    pub const fn restore(snapshot: &ProjectSnapshot) -> Self {
        Self {
            usage: snapshot.usage,
            user_set_storage: snapshot.user_set_storage,
            user_set_bandwidth: snapshot.user_set_bandwidth,
            rate: if snapshot.restores_rate_limits() {
                Some(snapshot.rate_limits())
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinel() {
        assert!(UsageLimits::ZERO.is_zero());
        assert!(UsageLimits::default().is_zero());
        assert!(!UsageLimits::new(0, 0, 1).is_zero());
    }

    #[test]
    fn user_set_limits_break_the_sentinel() {
        let snapshot = ProjectSnapshot {
            user_set_storage: Some(10),
            ..ProjectSnapshot::default()
        };
        assert!(!snapshot.is_zeroed());
        assert!(ProjectSnapshot::default().is_zeroed());
    }

    #[test]
    fn carry_rate_limits_skips_zero() {
        let mut snapshot = ProjectSnapshot::default();
        snapshot.carry_rate_limits(RateLimits::new(Some(0), Some(7)));
        assert_eq!(snapshot.rate_limit, None);
        assert_eq!(snapshot.burst_limit, Some(7));
        assert!(snapshot.restores_rate_limits());
    }

    #[test]
    fn restore_update_leaves_rate_untouched_when_nothing_captured() {
        let snapshot = ProjectSnapshot {
            usage: UsageLimits::new(1, 2, 3),
            ..ProjectSnapshot::default()
        };
        assert_eq!(ProjectLimitsUpdate::restore(&snapshot).rate, None);

        let zeroed = ProjectSnapshot {
            rate_limits_zeroed: true,
            ..snapshot
        };
        assert_eq!(
            ProjectLimitsUpdate::restore(&zeroed).rate,
            Some(RateLimits::new(None, None))
        );
    }

    #[test]
    fn merged_fills_gaps_from_later_snapshots() {
        let kept = ProjectId::new_v4();
        let missing = ProjectId::new_v4();
        let entry = |storage| ProjectSnapshot {
            usage: UsageLimits::new(storage, storage, 1),
            ..ProjectSnapshot::default()
        };

        let mut empty = FreezeEventLimits::for_user(UsageLimits::ZERO);
        empty.projects.insert(kept, entry(1));
        let mut full = FreezeEventLimits::for_user(UsageLimits::new(10, 20, 3));
        full.projects.insert(kept, entry(2));
        full.projects.insert(missing, entry(3));

        let merged = FreezeEventLimits::merged([&empty, &full]).unwrap();
        assert_eq!(merged.user, UsageLimits::new(10, 20, 3));
        assert_eq!(merged.projects[&kept], entry(1));
        assert_eq!(merged.projects[&missing], entry(3));

        let reversed = FreezeEventLimits::merged([&full, &empty]).unwrap();
        assert_eq!(reversed, full);
        assert_eq!(FreezeEventLimits::merged(Vec::<&FreezeEventLimits>::new()), None);
    }

    #[test]
    fn snapshot_json_shape() {
        let snapshot = ProjectSnapshot {
            usage: UsageLimits::new(500, 500, 10),
            rate_limit: Some(100),
            ..ProjectSnapshot::default()
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"storage": 500, "bandwidth": 500, "segment": 10, "rate_limit": 100})
        );
        let back: ProjectSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
