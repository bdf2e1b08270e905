//! Cycle phase state machine.
//!
//! `Idle → Collecting → Deciding → Guarding → Executing → Sleeping → Idle`,
//! with `Stopped` reachable from every phase and absorbing.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Collecting,
    Deciding,
    Guarding,
    Executing,
    Sleeping,
    Stopped,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Collecting => "collecting",
            CyclePhase::Deciding => "deciding",
            CyclePhase::Guarding => "guarding",
            CyclePhase::Executing => "executing",
            CyclePhase::Sleeping => "sleeping",
            CyclePhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The current phase finished normally.
    Completed,
    /// Cancellation was observed at a phase boundary.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: CyclePhase,
    pub event: PhaseEvent,
}

pub fn transition(current: CyclePhase, event: PhaseEvent) -> Result<CyclePhase, TransitionError> {
    match (current, event) {
        (CyclePhase::Stopped, PhaseEvent::Completed) => Err(TransitionError {
            from: current,
            event,
        }),
        (_, PhaseEvent::Cancelled) => Ok(CyclePhase::Stopped),
        (CyclePhase::Idle, PhaseEvent::Completed) => Ok(CyclePhase::Collecting),
        (CyclePhase::Collecting, PhaseEvent::Completed) => Ok(CyclePhase::Deciding),
        (CyclePhase::Deciding, PhaseEvent::Completed) => Ok(CyclePhase::Guarding),
        (CyclePhase::Guarding, PhaseEvent::Completed) => Ok(CyclePhase::Executing),
        (CyclePhase::Executing, PhaseEvent::Completed) => Ok(CyclePhase::Sleeping),
        (CyclePhase::Sleeping, PhaseEvent::Completed) => Ok(CyclePhase::Idle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_walks_one_full_cycle() {
        let mut phase = CyclePhase::Idle;
        let mut seen = vec![phase];
        for _ in 0..6 {
            phase = transition(phase, PhaseEvent::Completed).expect("transition");
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                CyclePhase::Idle,
                CyclePhase::Collecting,
                CyclePhase::Deciding,
                CyclePhase::Guarding,
                CyclePhase::Executing,
                CyclePhase::Sleeping,
                CyclePhase::Idle,
            ]
        );
    }

    #[test]
    fn cancel_stops_from_any_phase() {
        for phase in [
            CyclePhase::Idle,
            CyclePhase::Collecting,
            CyclePhase::Deciding,
            CyclePhase::Guarding,
            CyclePhase::Executing,
            CyclePhase::Sleeping,
            CyclePhase::Stopped,
        ] {
            assert_eq!(
                transition(phase, PhaseEvent::Cancelled),
                Ok(CyclePhase::Stopped)
            );
        }
    }

    #[test]
    fn stopped_is_terminal() {
        let err = transition(CyclePhase::Stopped, PhaseEvent::Completed).unwrap_err();
        assert_eq!(err.from, CyclePhase::Stopped);
        assert!(err.to_string().contains("stopped"));
    }
}
