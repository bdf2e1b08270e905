//! Action executor: apply admitted actions through the content gateway.
//!
//! Each action is attempted once and independently. Only confirmed successes
//! reach the dedup store, in admission order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::dedup::DedupStore;
use crate::core::types::{EngagementRecord, GuardedDecision, Outcome, ProposedAction};
use crate::error::GatewayError;
use crate::io::content::{ContentGateway, NewPost};

/// Longest title derived from a post's text.
pub const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteOutcome {
    pub records: Vec<EngagementRecord>,
    /// Admitted actions left unstarted because of cancellation.
    pub not_attempted: usize,
}

impl ExecuteOutcome {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .count()
    }
}

/// Execute `guarded.admitted` in order.
///
/// `now` stamps successful posts; it is a parameter so tests control the clock.
pub async fn execute<C, N>(
    content: &C,
    guarded: &GuardedDecision,
    dedup: &mut DedupStore,
    communities: &[String],
    cancel: &CancellationToken,
    now: N,
) -> ExecuteOutcome
where
    C: ContentGateway + ?Sized,
    N: Fn() -> DateTime<Utc>,
{
    let mut outcome = ExecuteOutcome::default();

    for (index, action) in guarded.admitted.iter().enumerate() {
        if cancel.is_cancelled() {
            outcome.not_attempted = guarded.admitted.len() - index;
            info!(
                not_attempted = outcome.not_attempted,
                "stop requested, leaving remaining actions"
            );
            break;
        }

        let result = apply(content, action, communities).await;
        let record = EngagementRecord {
            candidate_id: action.target().map(str::to_string),
            kind: action.kind(),
            outcome: match result {
                Ok(Applied::Sent) => Outcome::Succeeded,
                Ok(Applied::Nothing) => Outcome::NoOp,
                Err(reason) => Outcome::Failed { reason },
            },
        };

        match &record.outcome {
            Outcome::Succeeded => {
                if let Some(id) = &record.candidate_id {
                    dedup.record_engaged(id);
                }
                if matches!(action, ProposedAction::CreatePost { .. }) {
                    dedup.record_creation(now());
                }
                info!(
                    kind = record.kind.as_str(),
                    candidate_id = record.candidate_id.as_deref().unwrap_or("-"),
                    "action succeeded"
                );
            }
            Outcome::Failed { reason } => warn!(
                kind = record.kind.as_str(),
                candidate_id = record.candidate_id.as_deref().unwrap_or("-"),
                reason = %reason,
                "action failed"
            ),
            Outcome::NoOp => {}
        }
        outcome.records.push(record);
    }
    outcome
}

enum Applied {
    Sent,
    Nothing,
}

async fn apply<C: ContentGateway + ?Sized>(
    content: &C,
    action: &ProposedAction,
    communities: &[String],
) -> Result<Applied, String> {
    let sent: Result<(), GatewayError> = match action {
        ProposedAction::Comment { target, text } => content.comment(target, text).await,
        ProposedAction::Vote { target } => content.vote(target).await,
        ProposedAction::CreatePost {
            title,
            text,
            community,
        } => {
            let Some(community) = community.as_ref().or_else(|| communities.first()) else {
                return Err("no community configured for posts".to_string());
            };
            let post = NewPost {
                title: title.clone().unwrap_or_else(|| derive_title(text)),
                body: text.clone(),
                community: community.clone(),
            };
            content.create_post(&post).await
        }
        ProposedAction::Skip { .. } => return Ok(Applied::Nothing),
    };
    sent.map(|()| Applied::Sent).map_err(|err| err.to_string())
}

/// First non-empty line of `text`, cut to [`MAX_TITLE_CHARS`].
pub fn derive_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let mut chars = line.chars();
    let title: String = chars.by_ref().take(MAX_TITLE_CHARS).collect();
    if chars.next().is_some() {
        let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        return format!("{}...", cut.trim_end());
    }
    title
}
