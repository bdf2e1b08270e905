//! Per-cycle quota and cooldown arithmetic.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::Quotas;

/// Quotas still available at the start of a cycle, as reported to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingBudget {
    pub comments: u32,
    /// Zero while the post cooldown is active.
    pub posts: u32,
    pub cooldown_remaining: Option<Duration>,
}

impl RemainingBudget {
    pub fn is_exhausted(&self) -> bool {
        self.comments == 0 && self.posts == 0
    }
}

/// Compute the budget shown to the oracle for a fresh cycle.
pub fn remaining_budget(
    quotas: &Quotas,
    last_creation_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RemainingBudget {
    let cooldown_remaining = cooldown_remaining(last_creation_at, now, quotas.post_cooldown);
    RemainingBudget {
        comments: quotas.max_comments,
        posts: if cooldown_remaining.is_some() {
            0
        } else {
            quotas.max_posts
        },
        cooldown_remaining,
    }
}

/// Time left before another post may be created, or `None` if the cooldown has elapsed.
///
/// A clock that moved backwards counts as zero elapsed time.
pub fn cooldown_remaining(
    last_creation_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Option<Duration> {
    let last = last_creation_at?;
    let elapsed = now
        .signed_duration_since(last)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if elapsed >= cooldown {
        return None;
    }
    Some(cooldown - elapsed)
}
