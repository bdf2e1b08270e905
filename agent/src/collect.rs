//! Candidate collection for one cycle.
//!
//! Queries run strictly in order: topic searches, then each community's hot
//! feed, then (only if the set is still short) each community's newest posts.
//! A failing query is logged and contributes nothing.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::dedup::DedupStore;
use crate::core::merge::merge_candidates;
use crate::core::types::{Candidate, FeedSort};
use crate::io::content::ContentGateway;

/// Result of the collecting phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectOutcome {
    pub candidates: Vec<Candidate>,
    /// Queries that failed and were skipped.
    pub query_errors: u32,
    /// Cancellation was observed before every query ran.
    pub interrupted: bool,
}

enum Query<'a> {
    Search(&'a str),
    Feed(&'a str, FeedSort),
}

/// Collect at most `max_candidates` fresh candidates.
pub async fn collect<C: ContentGateway + ?Sized>(
    content: &C,
    topics: &[String],
    communities: &[String],
    dedup: &DedupStore,
    max_candidates: usize,
    cancel: &CancellationToken,
) -> CollectOutcome {
    let mut batches: Vec<Vec<Candidate>> = Vec::new();
    let mut outcome = CollectOutcome::default();

    let primary = topics
        .iter()
        .map(|t| Query::Search(t))
        .chain(communities.iter().map(|c| Query::Feed(c, FeedSort::Hot)));
    if !run_queries(content, primary, &mut batches, &mut outcome, cancel).await {
        outcome.candidates = merge_candidates(batches, dedup, max_candidates);
        return outcome;
    }

    let fresh = merge_candidates(batches.iter().cloned(), dedup, max_candidates).len();
    if fresh < max_candidates {
        debug!(fresh, max_candidates, "browsing newest posts");
        let fallback = communities.iter().map(|c| Query::Feed(c, FeedSort::New));
        run_queries(content, fallback, &mut batches, &mut outcome, cancel).await;
    }

    outcome.candidates = merge_candidates(batches, dedup, max_candidates);
    outcome
}

/// Returns `false` if cancellation cut the pass short.
async fn run_queries<'a, C, I>(
    content: &C,
    queries: I,
    batches: &mut Vec<Vec<Candidate>>,
    outcome: &mut CollectOutcome,
    cancel: &CancellationToken,
) -> bool
where
    C: ContentGateway + ?Sized,
    I: Iterator<Item = Query<'a>>,
{
    for query in queries {
        if cancel.is_cancelled() {
            outcome.interrupted = true;
            return false;
        }
        let result = match query {
            Query::Search(topic) => content.search(topic).await.map_err(|err| {
                warn!(topic, error = %err, "topic search failed");
            }),
            Query::Feed(community, sort) => content.feed(community, sort).await.map_err(|err| {
                warn!(community, sort = sort.as_str(), error = %err, "feed listing failed");
            }),
        };
        match result {
            Ok(batch) => batches.push(batch),
            Err(()) => outcome.query_errors += 1,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ContentCall, ScriptedContent, feed_candidate, topic_candidate};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[tokio::test]
    async fn search_results_come_before_feed_results() {
        let content = ScriptedContent::new()
            .with_search(
                "rust",
                vec![topic_candidate("s1", "rust"), topic_candidate("s2", "rust")],
            )
            .with_feed(
                "general",
                FeedSort::Hot,
                vec![feed_candidate("f1", "general"), feed_candidate("s1", "general")],
            );
        let out = collect(
            &content,
            &strings(&["rust"]),
            &strings(&["general"]),
            &DedupStore::new(10),
            3,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(ids(&out.candidates), vec!["s1", "s2", "f1"]);
        assert_eq!(out.query_errors, 0);
        let newest = ContentCall::Feed("general".to_string(), FeedSort::New);
        assert!(!content.calls().contains(&newest));
    }

    #[tokio::test]
    async fn failing_query_is_skipped_and_counted() {
        let content = ScriptedContent::new()
            .failing_read("rust")
            .with_search("go", vec![topic_candidate("g1", "go")]);
        let out = collect(
            &content,
            &strings(&["rust", "go"]),
            &[],
            &DedupStore::new(10),
            5,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(ids(&out.candidates), vec!["g1"]);
        assert_eq!(out.query_errors, 1);
    }

    #[tokio::test]
    async fn newest_posts_fill_a_short_set_and_engaged_ids_are_dropped() {
        let mut dedup = DedupStore::new(10);
        dedup.record_engaged("h1");
        let content = ScriptedContent::new()
            .with_feed("general", FeedSort::Hot, vec![feed_candidate("h1", "general")])
            .with_feed("general", FeedSort::New, vec![feed_candidate("n1", "general")]);
        let out = collect(
            &content,
            &[],
            &strings(&["general"]),
            &dedup,
            5,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(ids(&out.candidates), vec!["n1"]);
    }

    #[tokio::test]
    async fn cancelled_collection_stops_querying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let content = ScriptedContent::new();
        let out = collect(
            &content,
            &strings(&["rust"]),
            &strings(&["general"]),
            &DedupStore::new(10),
            5,
            &cancel,
        )
        .await;
        assert!(out.interrupted);
        assert!(out.candidates.is_empty());
        assert!(content.calls().is_empty());
    }
}
