//! Shared deterministic types for the engagement loop.
//!
//! These types define the contracts between loop phases. Apart from what the
//! dedup store retains, every value here lives for a single cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Feed ordering requested from the content platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSort {
    Hot,
    New,
}

impl FeedSort {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSort::Hot => "hot",
            FeedSort::New => "new",
        }
    }
}

/// Where a candidate was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum CandidateSource {
    Topic { topic: String },
    Feed { community: String, sort: FeedSort },
}

/// An item on the platform the agent may engage with during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Opaque platform id. Unique within one cycle's candidate set.
    pub id: String,
    pub source: CandidateSource,
    /// Short human-readable rendering shown to the oracle.
    pub summary: String,
}

/// Closed set of action kinds the loop knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Comment,
    Vote,
    CreatePost,
    Skip,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Comment => "comment",
            ActionKind::Vote => "vote",
            ActionKind::CreatePost => "create_post",
            ActionKind::Skip => "skip",
        }
    }
}

/// One action proposed by the oracle.
///
/// The serde shape is the wire format the oracle is asked to produce; values
/// are untrusted until they pass decision validation and the policy guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedAction {
    Comment {
        target: String,
        text: String,
    },
    Vote {
        target: String,
    },
    CreatePost {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        community: Option<String>,
    },
    Skip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ProposedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            ProposedAction::Comment { .. } => ActionKind::Comment,
            ProposedAction::Vote { .. } => ActionKind::Vote,
            ProposedAction::CreatePost { .. } => ActionKind::CreatePost,
            ProposedAction::Skip { .. } => ActionKind::Skip,
        }
    }

    /// Candidate id this action refers to, if the kind targets a candidate.
    pub fn target(&self) -> Option<&str> {
        match self {
            ProposedAction::Comment { target, .. } | ProposedAction::Vote { target } => {
                Some(target)
            }
            ProposedAction::CreatePost { .. } | ProposedAction::Skip { .. } => None,
        }
    }
}

/// Ordered oracle output after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub actions: Vec<ProposedAction>,
}

/// Hard per-cycle limits applied by the policy guard.
#[derive(Debug, Clone, PartialEq)]
pub struct Quotas {
    pub max_comments: u32,
    pub max_posts: u32,
    pub post_cooldown: Duration,
    /// Independent admission probability for each proposed vote, in `[0, 1]`.
    pub vote_probability: f64,
}

/// Why the policy guard dropped an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    UnknownTarget,
    UnknownCommunity,
    DuplicateTarget,
    CommentQuotaExceeded,
    PostQuotaExceeded,
    CooldownActive,
    VoteNotSampled,
}

impl PolicyViolation {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyViolation::UnknownTarget => "unknown_target",
            PolicyViolation::UnknownCommunity => "unknown_community",
            PolicyViolation::DuplicateTarget => "duplicate_target",
            PolicyViolation::CommentQuotaExceeded => "comment_quota_exceeded",
            PolicyViolation::PostQuotaExceeded => "post_quota_exceeded",
            PolicyViolation::CooldownActive => "cooldown_active",
            PolicyViolation::VoteNotSampled => "vote_not_sampled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedAction {
    pub action: ProposedAction,
    pub reason: PolicyViolation,
}

/// Subset of a [`Decision`] that passed the policy guard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardedDecision {
    /// Admitted actions in their original relative order.
    pub admitted: Vec<ProposedAction>,
    pub dropped: Vec<DroppedAction>,
    pub comments_used: u32,
    pub posts_used: u32,
}

/// Result of attempting one admitted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
    /// Skip actions; nothing was sent to the platform.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngagementRecord {
    pub candidate_id: Option<String>,
    pub kind: ActionKind,
    pub outcome: Outcome,
}

impl EngagementRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}
