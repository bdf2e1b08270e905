//! Orchestration for a single engagement cycle.
//!
//! One call walks `Idle → Collecting → Deciding → Guarding → Executing →
//! Sleeping`, checking for cancellation at every boundary. Nothing inside a
//! cycle is fatal: gateway and oracle failures shrink the cycle's output and
//! are reported in the returned [`CycleSummary`].

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collect::collect;
use crate::core::budget::remaining_budget;
use crate::core::dedup::DedupStore;
use crate::core::phase::{CyclePhase, PhaseEvent, transition};
use crate::core::policy::{GuardContext, guard};
use crate::core::types::{Decision, EngagementRecord};
use crate::decide::{DecisionEngine, Persona};
use crate::execute::execute;
use crate::io::config::AgentConfig;
use crate::io::content::ContentGateway;
use crate::io::oracle::OracleGateway;

/// Publishes the current phase to any number of observers.
#[derive(Debug)]
pub struct PhaseTracker {
    tx: watch::Sender<CyclePhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CyclePhase::Idle);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> CyclePhase {
        *self.tx.borrow()
    }

    /// Move to the next phase in the cycle.
    pub fn advance(&self) -> CyclePhase {
        self.apply(PhaseEvent::Completed)
    }

    /// Move to `Stopped`.
    pub fn stop(&self) -> CyclePhase {
        self.apply(PhaseEvent::Cancelled)
    }

    fn apply(&self, event: PhaseEvent) -> CyclePhase {
        let current = self.current();
        match transition(current, event) {
            Ok(next) => {
                self.tx.send_replace(next);
                debug!(from = %current, to = %next, "phase change");
                next
            }
            Err(err) => {
                warn!(error = %err, "ignoring phase event");
                current
            }
        }
    }
}

/// Structured outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    /// RFC 3339, UTC.
    pub started_at: String,
    pub duration_ms: u64,
    pub candidates: usize,
    pub collect_errors: u32,
    pub proposed: usize,
    pub admitted: usize,
    /// Dropped actions keyed by policy violation.
    pub dropped: BTreeMap<&'static str, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_error: Option<&'static str>,
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub records: Vec<EngagementRecord>,
    pub dedup_size: usize,
    /// Cancellation ended the cycle early.
    pub stopped: bool,
}

impl CycleSummary {
    /// Empty summary for cycle number `cycle`, stamped now.
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_ms: 0,
            candidates: 0,
            collect_errors: 0,
            proposed: 0,
            admitted: 0,
            dropped: BTreeMap::new(),
            decision_error: None,
            succeeded: 0,
            failed: 0,
            not_attempted: 0,
            records: Vec::new(),
            dedup_size: 0,
            stopped: false,
        }
    }

    pub fn dropped_total(&self) -> u32 {
        self.dropped.values().sum()
    }
}

/// Borrowed state one cycle runs against.
pub struct CycleContext<'a, C: ?Sized, O: ?Sized, R: ?Sized> {
    pub number: u64,
    pub config: &'a AgentConfig,
    pub persona: &'a Persona,
    pub engine: &'a DecisionEngine,
    pub content: &'a C,
    pub oracle: &'a O,
    pub dedup: &'a mut DedupStore,
    pub rng: &'a mut R,
    pub phases: &'a PhaseTracker,
    pub cancel: &'a CancellationToken,
}

/// Run one cycle from `Idle` to `Sleeping` (or `Stopped` on cancellation).
///
/// A tracker still at `Sleeping` from the previous cycle is woken first.
pub async fn run_cycle<C, O, R>(ctx: CycleContext<'_, C, O, R>) -> CycleSummary
where
    C: ContentGateway + ?Sized,
    O: OracleGateway + ?Sized,
    R: Rng + ?Sized,
{
    let CycleContext {
        number,
        config,
        persona,
        engine,
        content,
        oracle,
        dedup,
        rng,
        phases,
        cancel,
    } = ctx;
    let started = Instant::now();
    let mut summary = CycleSummary::new(number);
    let quotas = config.quotas();

    if phases.current() == CyclePhase::Sleeping {
        phases.advance();
    }
    phases.advance();
    let collected = collect(
        content,
        &config.topics,
        &config.communities,
        dedup,
        config.max_candidates,
        cancel,
    )
    .await;
    summary.candidates = collected.candidates.len();
    summary.collect_errors = collected.query_errors;
    if cancel.is_cancelled() {
        return stopped(summary, phases, dedup, started);
    }

    phases.advance();
    let budget = remaining_budget(&quotas, dedup.last_creation_at(), Utc::now());
    let decision = if collected.candidates.is_empty() && budget.posts == 0 {
        debug!(cycle = number, "no candidates and no post allowance, skipping oracle");
        Decision::default()
    } else {
        match engine
            .decide(oracle, &collected.candidates, persona, budget)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                warn!(cycle = number, error = %err, "no decision this cycle");
                summary.decision_error = Some(err.label());
                Decision::default()
            }
        }
    };
    summary.proposed = decision.actions.len();
    if cancel.is_cancelled() {
        return stopped(summary, phases, dedup, started);
    }

    phases.advance();
    let candidate_ids: HashSet<&str> = collected.candidates.iter().map(|c| c.id.as_str()).collect();
    let guarded = guard(
        &decision,
        &GuardContext {
            candidate_ids: &candidate_ids,
            communities: &config.communities,
            quotas: &quotas,
            last_creation_at: dedup.last_creation_at(),
            now: Utc::now(),
        },
        rng,
    );
    summary.admitted = guarded.admitted.len();
    for dropped in &guarded.dropped {
        debug!(
            kind = dropped.action.kind().as_str(),
            reason = dropped.reason.as_str(),
            "action dropped by policy"
        );
        *summary.dropped.entry(dropped.reason.as_str()).or_default() += 1;
    }
    if cancel.is_cancelled() {
        return stopped(summary, phases, dedup, started);
    }

    phases.advance();
    let executed = execute(
        content,
        &guarded,
        dedup,
        &config.communities,
        cancel,
        Utc::now,
    )
    .await;
    summary.succeeded = executed.succeeded();
    summary.failed = executed.failed();
    summary.not_attempted = executed.not_attempted;
    summary.records = executed.records;
    if cancel.is_cancelled() {
        return stopped(summary, phases, dedup, started);
    }

    phases.advance();
    summary.dedup_size = dedup.len();
    summary.duration_ms = elapsed_ms(started);
    info!(
        cycle = summary.cycle,
        candidates = summary.candidates,
        proposed = summary.proposed,
        admitted = summary.admitted,
        dropped = summary.dropped_total(),
        succeeded = summary.succeeded,
        failed = summary.failed,
        duration_ms = summary.duration_ms,
        "cycle complete"
    );
    summary
}

fn stopped(
    mut summary: CycleSummary,
    phases: &PhaseTracker,
    dedup: &DedupStore,
    started: Instant,
) -> CycleSummary {
    phases.stop();
    summary.stopped = true;
    summary.dedup_size = dedup.len();
    summary.duration_ms = elapsed_ms(started);
    info!(
        cycle = summary.cycle,
        succeeded = summary.succeeded,
        not_attempted = summary.not_attempted,
        "cycle stopped"
    );
    summary
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::oracle::SamplingParams;
    use crate::test_support::{ScriptedContent, ScriptedOracle, topic_candidate};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Fixture {
        config: AgentConfig,
        persona: Persona,
        engine: DecisionEngine,
        dedup: DedupStore,
        rng: StdRng,
        phases: PhaseTracker,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let config = AgentConfig {
                topics: vec!["rust".to_string()],
                vote_probability: 1.0,
                ..AgentConfig::default()
            };
            Self {
                persona: Persona::from(&config),
                engine: DecisionEngine::new(SamplingParams::from(&config.oracle)).expect("engine"),
                dedup: DedupStore::new(100),
                rng: StdRng::seed_from_u64(7),
                phases: PhaseTracker::new(),
                cancel: CancellationToken::new(),
                config,
            }
        }

        async fn run(
            &mut self,
            content: &ScriptedContent,
            oracle: &ScriptedOracle,
        ) -> CycleSummary {
            run_cycle(CycleContext {
                number: 1,
                config: &self.config,
                persona: &self.persona,
                engine: &self.engine,
                content,
                oracle,
                dedup: &mut self.dedup,
                rng: &mut self.rng,
                phases: &self.phases,
                cancel: &self.cancel,
            })
            .await
        }
    }

    #[tokio::test]
    async fn full_cycle_ends_sleeping_with_summary() {
        let mut fx = Fixture::new();
        let content =
            ScriptedContent::new().with_search("rust", vec![topic_candidate("a", "rust")]);
        let oracle = ScriptedOracle::new([
            r#"{"actions":[{"kind":"vote","target":"a"},{"kind":"vote","target":"ghost"}]}"#,
        ]);
        let summary = fx.run(&content, &oracle).await;

        assert_eq!(fx.phases.current(), CyclePhase::Sleeping);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.decision_error, Some("oracle_malformed"));
        assert_eq!(summary.proposed, 0);
        assert!(summary.records.is_empty());
        assert!(!summary.stopped);
    }

    #[tokio::test]
    async fn back_to_back_cycles_each_end_sleeping() {
        let mut fx = Fixture::new();
        let content =
            ScriptedContent::new().with_search("rust", vec![topic_candidate("a", "rust")]);
        let oracle = ScriptedOracle::default();

        let first = fx.run(&content, &oracle).await;
        assert_eq!(fx.phases.current(), CyclePhase::Sleeping);
        let second = fx.run(&content, &oracle).await;

        assert_eq!(fx.phases.current(), CyclePhase::Sleeping);
        assert!(!first.stopped && !second.stopped);
        assert_eq!(oracle.prompts().len(), 2);
    }

    #[tokio::test]
    async fn admitted_vote_is_recorded() {
        let mut fx = Fixture::new();
        let content =
            ScriptedContent::new().with_search("rust", vec![topic_candidate("a", "rust")]);
        let oracle = ScriptedOracle::new([r#"{"actions":[{"kind":"vote","target":"a"}]}"#]);
        let summary = fx.run(&content, &oracle).await;

        assert_eq!((summary.proposed, summary.admitted, summary.succeeded), (1, 1, 1));
        assert_eq!(summary.dedup_size, 1);
        assert!(fx.dedup.contains("a"));
    }

    #[tokio::test]
    async fn oracle_is_not_consulted_without_candidates_or_post_allowance() {
        let mut fx = Fixture::new();
        fx.config.max_posts_per_cycle = 0;
        let oracle = ScriptedOracle::default();
        let summary = fx.run(&ScriptedContent::new(), &oracle).await;

        assert!(oracle.prompts().is_empty());
        assert_eq!(summary.proposed, 0);
        assert_eq!(fx.phases.current(), CyclePhase::Sleeping);
    }

    #[tokio::test]
    async fn cancelled_before_start_stops_after_collecting() {
        let mut fx = Fixture::new();
        fx.cancel.cancel();
        let oracle = ScriptedOracle::default();
        let summary = fx.run(&ScriptedContent::new(), &oracle).await;

        assert!(summary.stopped);
        assert_eq!(fx.phases.current(), CyclePhase::Stopped);
        assert!(oracle.prompts().is_empty());
    }

    #[test]
    fn stopped_tracker_ignores_further_progress() {
        let phases = PhaseTracker::new();
        let rx = phases.subscribe();
        phases.advance();
        assert_eq!(*rx.borrow(), CyclePhase::Collecting);
        phases.stop();
        assert_eq!(phases.advance(), CyclePhase::Stopped);
        assert_eq!(*rx.borrow(), CyclePhase::Stopped);
    }
}
