//! Cycle scheduler: the long-running loop and its lifecycle handle.
//!
//! Cycles run one at a time on a single task. The next cycle starts
//! `cycle_interval` after the previous one finished (fixed delay), and the
//! sleep in between ends early when stop is requested.

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::dedup::DedupStore;
use crate::core::phase::CyclePhase;
use crate::cycle::{CycleContext, CycleSummary, PhaseTracker, run_cycle};
use crate::decide::{DecisionEngine, Persona};
use crate::io::config::AgentConfig;
use crate::io::content::ContentGateway;
use crate::io::oracle::{OracleGateway, SamplingParams};

/// Reason why `Agent::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Stop was requested.
    Cancelled,
    /// The requested number of cycles completed.
    CycleLimit,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles_run: u64,
    /// Ids held by the dedup store when the loop ended.
    pub engaged: usize,
    pub stop: LoopStop,
}

/// The engagement loop and everything it owns across cycles.
pub struct Agent<C, O> {
    config: AgentConfig,
    persona: Persona,
    engine: DecisionEngine,
    content: C,
    oracle: O,
    dedup: DedupStore,
    rng: StdRng,
    phases: PhaseTracker,
    cancel: CancellationToken,
    cycles_run: u64,
}

impl<C: ContentGateway, O: OracleGateway> Agent<C, O> {
    /// Validate `config` and assemble the loop. Fails with the config problems.
    pub fn new(config: AgentConfig, content: C, oracle: O) -> Result<Self> {
        config.validate()?;
        let engine = DecisionEngine::new(SamplingParams::from(&config.oracle))
            .context("build decision engine")?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            persona: Persona::from(&config),
            dedup: DedupStore::new(config.dedup_capacity),
            engine,
            content,
            oracle,
            rng,
            phases: PhaseTracker::new(),
            cancel: CancellationToken::new(),
            cycles_run: 0,
            config,
        })
    }

    /// Share an externally owned token (e.g. one tripped by signal handlers).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> watch::Receiver<CyclePhase> {
        self.phases.subscribe()
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Run exactly one cycle, leaving the phase at `Sleeping` (or `Stopped`).
    pub async fn run_cycle(&mut self) -> CycleSummary {
        self.cycles_run += 1;
        run_cycle(CycleContext {
            number: self.cycles_run,
            config: &self.config,
            persona: &self.persona,
            engine: &self.engine,
            content: &self.content,
            oracle: &self.oracle,
            dedup: &mut self.dedup,
            rng: &mut self.rng,
            phases: &self.phases,
            cancel: &self.cancel,
        })
        .await
    }

    /// Run cycles until stop is requested or `max_cycles` have completed.
    pub async fn run<F: FnMut(&CycleSummary)>(
        &mut self,
        max_cycles: Option<u64>,
        mut on_cycle: F,
    ) -> LoopOutcome {
        let interval = self.config.cycle_interval();
        let mut cycles_this_run = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return self.finish(LoopStop::Cancelled);
            }

            let summary = self.run_cycle().await;
            cycles_this_run += 1;
            on_cycle(&summary);
            if summary.stopped {
                return self.finish(LoopStop::Cancelled);
            }
            if max_cycles.is_some_and(|max| cycles_this_run >= max) {
                return self.finish(LoopStop::CycleLimit);
            }

            // Sleeping.
            if self.cancel.is_cancelled() {
                return self.finish(LoopStop::Cancelled);
            }
            debug!(secs = interval.as_secs(), "sleeping until next cycle");
            tokio::select! {
                _ = self.cancel.cancelled() => return self.finish(LoopStop::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
            self.phases.advance();
        }
    }

    fn finish(&self, stop: LoopStop) -> LoopOutcome {
        self.phases.stop();
        info!(cycles = self.cycles_run, engaged = self.dedup.len(), ?stop, "agent stopped");
        LoopOutcome {
            cycles_run: self.cycles_run,
            engaged: self.dedup.len(),
            stop,
        }
    }
}

impl<C, O> Agent<C, O>
where
    C: ContentGateway + 'static,
    O: OracleGateway + 'static,
{
    /// Move the loop onto its own task.
    pub fn spawn<F>(mut self, max_cycles: Option<u64>, on_cycle: F) -> AgentHandle
    where
        F: FnMut(&CycleSummary) + Send + 'static,
    {
        let cancel = self.cancellation();
        let phase = self.phase();
        let task = tokio::spawn(async move { self.run(max_cycles, on_cycle).await });
        AgentHandle {
            cancel,
            phase,
            task,
        }
    }
}

/// Build an agent from `config` and start it in the background.
pub fn start<C, O, F>(
    config: AgentConfig,
    content: C,
    oracle: O,
    on_cycle: F,
) -> Result<AgentHandle>
where
    C: ContentGateway + 'static,
    O: OracleGateway + 'static,
    F: FnMut(&CycleSummary) + Send + 'static,
{
    Ok(Agent::new(config, content, oracle)?.spawn(None, on_cycle))
}

/// Control surface for a running agent.
#[derive(Debug)]
pub struct AgentHandle {
    cancel: CancellationToken,
    phase: watch::Receiver<CyclePhase>,
    task: JoinHandle<LoopOutcome>,
}

impl AgentHandle {
    /// Request cooperative shutdown. The in-flight action, if any, completes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.phase.clone()
    }

    /// Wait for the loop to reach `Stopped`.
    pub async fn join(self) -> Result<LoopOutcome> {
        self.task.await.context("agent task failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedContent, ScriptedOracle, topic_candidate};
    use std::time::Duration;

    fn config() -> AgentConfig {
        AgentConfig {
            topics: vec!["rust".to_string()],
            rng_seed: Some(1),
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_running() {
        let bad = AgentConfig {
            cycle_interval_secs: 0,
            ..config()
        };
        let err = Agent::new(bad, ScriptedContent::new(), ScriptedOracle::default())
            .err()
            .expect("invalid config");
        assert!(err.to_string().contains("cycle_interval_secs"));
    }

    #[tokio::test]
    async fn cycle_limit_stops_without_sleeping() {
        let mut agent =
            Agent::new(config(), ScriptedContent::new(), ScriptedOracle::default()).expect("agent");
        let mut seen = Vec::new();
        let outcome = agent.run(Some(1), |s| seen.push(s.cycle)).await;
        assert_eq!(outcome.stop, LoopStop::CycleLimit);
        assert_eq!(seen, vec![1]);
        assert_eq!(*agent.phase().borrow(), CyclePhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_are_separated_by_the_interval() {
        let content =
            ScriptedContent::new().with_search("rust", vec![topic_candidate("a", "rust")]);
        let mut agent = Agent::new(config(), content, ScriptedOracle::default()).expect("agent");
        let start = tokio::time::Instant::now();
        let outcome = agent.run(Some(3), |_| {}).await;
        assert_eq!(outcome.cycles_run, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_pushes_back_the_next_start() {
        let content =
            ScriptedContent::new().with_search("rust", vec![topic_candidate("a", "rust")]);
        let oracle = ScriptedOracle::default().with_latency(Duration::from_secs(100));
        let mut agent = Agent::new(config(), content, oracle).expect("agent");
        let start = tokio::time::Instant::now();
        let outcome = agent.run(Some(3), |_| {}).await;
        assert_eq!(outcome.cycles_run, 3);
        assert_eq!(agent.oracle().prompts().len(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3 * 100 + 2 * 300));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_sleep_ends_the_loop() {
        let agent =
            Agent::new(config(), ScriptedContent::new(), ScriptedOracle::default()).expect("agent");
        let handle = agent.spawn(None, |_| {});
        let mut phase = handle.subscribe();
        phase
            .wait_for(|p| *p == CyclePhase::Sleeping)
            .await
            .expect("sleeping");
        handle.stop();
        let outcome = handle.join().await.expect("join");
        assert_eq!(outcome.stop, LoopStop::Cancelled);
        assert_eq!(outcome.cycles_run, 1);
        assert_eq!(*phase.borrow(), CyclePhase::Stopped);
    }
}
