//! Policy guard: the last gate between oracle output and side effects.
//!
//! Pure apart from the random draws for vote admission, which come from the
//! caller's RNG so tests can seed them. Rules, per action and in order:
//!
//! 1. targets must be in the cycle's candidate set, communities must be
//!    configured, and a kind may hit a target at most once per cycle;
//! 2. comments are admitted up to the per-cycle quota;
//! 3. posts are admitted up to the per-cycle quota and only outside the cooldown;
//! 4. each vote is admitted by an independent Bernoulli draw;
//! 5. skips are always admitted.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::core::budget::cooldown_remaining;
use crate::core::types::{
    ActionKind, Decision, DroppedAction, GuardedDecision, PolicyViolation, ProposedAction, Quotas,
};

/// Everything the guard reads besides the decision itself.
#[derive(Debug, Clone)]
pub struct GuardContext<'a> {
    pub candidate_ids: &'a HashSet<&'a str>,
    pub communities: &'a [String],
    pub quotas: &'a Quotas,
    pub last_creation_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub fn guard<R: Rng + ?Sized>(
    decision: &Decision,
    ctx: &GuardContext<'_>,
    rng: &mut R,
) -> GuardedDecision {
    let mut out = GuardedDecision::default();
    let mut engaged: HashSet<(ActionKind, &str)> = HashSet::new();

    for action in &decision.actions {
        match check(action, ctx, &out, &engaged, rng) {
            Ok(()) => {
                match action {
                    ProposedAction::Comment { .. } => out.comments_used += 1,
                    ProposedAction::CreatePost { .. } => out.posts_used += 1,
                    ProposedAction::Vote { .. } | ProposedAction::Skip { .. } => {}
                }
                if let Some(target) = action.target() {
                    engaged.insert((action.kind(), target));
                }
                out.admitted.push(action.clone());
            }
            Err(reason) => out.dropped.push(DroppedAction {
                action: action.clone(),
                reason,
            }),
        }
    }
    out
}

fn check<R: Rng + ?Sized>(
    action: &ProposedAction,
    ctx: &GuardContext<'_>,
    so_far: &GuardedDecision,
    engaged: &HashSet<(ActionKind, &str)>,
    rng: &mut R,
) -> Result<(), PolicyViolation> {
    if let Some(target) = action.target() {
        if !ctx.candidate_ids.contains(target) {
            return Err(PolicyViolation::UnknownTarget);
        }
        if engaged.contains(&(action.kind(), target)) {
            return Err(PolicyViolation::DuplicateTarget);
        }
    }

    match action {
        ProposedAction::Comment { .. } => {
            if so_far.comments_used >= ctx.quotas.max_comments {
                return Err(PolicyViolation::CommentQuotaExceeded);
            }
        }
        ProposedAction::CreatePost { community, .. } => {
            if let Some(community) = community {
                if !ctx.communities.iter().any(|c| c == community) {
                    return Err(PolicyViolation::UnknownCommunity);
                }
            }
            if so_far.posts_used >= ctx.quotas.max_posts {
                return Err(PolicyViolation::PostQuotaExceeded);
            }
            // A post admitted earlier in this cycle restarts the cooldown.
            let last = if so_far.posts_used > 0 {
                Some(ctx.now)
            } else {
                ctx.last_creation_at
            };
            if cooldown_remaining(last, ctx.now, ctx.quotas.post_cooldown).is_some() {
                return Err(PolicyViolation::CooldownActive);
            }
        }
        ProposedAction::Vote { .. } => {
            if !bernoulli(rng, ctx.quotas.vote_probability) {
                return Err(PolicyViolation::VoteNotSampled);
            }
        }
        ProposedAction::Skip { .. } => {}
    }
    Ok(())
}

fn bernoulli<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    if probability.is_nan() || probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    rng.gen_bool(probability)
}
