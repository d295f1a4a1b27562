// Convergence Monitor - turns orientation-assist convergence signals into user hints

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Why the orientation-assist subsystem has not converged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceReason {
    InsufficientMovement,
    InsufficientHorizontalSweep,
    InsufficientVerticalSweep,
    InsufficientLighting,
    Unknown(String),
}

/// Convergence status reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Converged,
    NotConverged(Vec<ConvergenceReason>),
}

/// User-actionable hint, ordered by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionHint {
    IncreaseLighting,
    SweepSideToSide,
    SweepUpAndDown,
    MoveDevice,
}

impl DirectionHint {
    pub fn message(&self) -> &'static str {
        match self {
            DirectionHint::IncreaseLighting => "Move to a brighter area",
            DirectionHint::SweepSideToSide => "Slowly move your device side to side",
            DirectionHint::SweepUpAndDown => "Slowly move your device up and down",
            DirectionHint::MoveDevice => "Move your device around",
        }
    }
}

impl From<&ConvergenceReason> for DirectionHint {
    fn from(reason: &ConvergenceReason) -> Self {
        match reason {
            ConvergenceReason::InsufficientLighting => DirectionHint::IncreaseLighting,
            ConvergenceReason::InsufficientHorizontalSweep => DirectionHint::SweepSideToSide,
            ConvergenceReason::InsufficientVerticalSweep => DirectionHint::SweepUpAndDown,
            ConvergenceReason::InsufficientMovement | ConvergenceReason::Unknown(_) => {
                DirectionHint::MoveDevice
            }
        }
    }
}

/// Result of a processed convergence event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    Converged,
    NeedsHelp(Vec<DirectionHint>),
}

/// Per-peer, rate-limited convergence interpreter
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    window: Duration,
    max_hints: usize,
    last_processed_at: Option<Instant>,
    hints: Vec<DirectionHint>,
}

impl ConvergenceMonitor {
    pub fn new(window: Duration, max_hints: usize) -> Self {
        Self {
            window,
            max_hints,
            last_processed_at: None,
            hints: Vec::new(),
        }
    }

    /// Process a status event; `None` when it falls inside the current window
    pub fn process(&mut self, status: &ConvergenceStatus, now: Instant) -> Option<ConvergenceOutcome> {
        if let Some(last) = self.last_processed_at {
            if now.duration_since(last) < self.window {
                return None;
            }
        }
        self.last_processed_at = Some(now);

        match status {
            ConvergenceStatus::Converged => {
                self.hints.clear();
                Some(ConvergenceOutcome::Converged)
            }
            ConvergenceStatus::NotConverged(reasons) => {
                self.hints = rank_hints(reasons, self.max_hints);
                Some(ConvergenceOutcome::NeedsHelp(self.hints.clone()))
            }
        }
    }

    pub fn hints(&self) -> &[DirectionHint] {
        &self.hints
    }
}

/// Deduplicated hints in priority order; an empty reason list still asks for movement
fn rank_hints(reasons: &[ConvergenceReason], max_hints: usize) -> Vec<DirectionHint> {
    let mut hints: Vec<DirectionHint> = reasons.iter().map(DirectionHint::from).collect();
    if hints.is_empty() {
        hints.push(DirectionHint::MoveDevice);
    }
    hints.sort();
    hints.dedup();
    hints.truncate(max_hints.max(1));
    hints
}
