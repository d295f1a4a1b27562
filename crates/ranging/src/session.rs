// Peer session record - one per remote peer, owned by the coordinator

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::convergence::{ConvergenceMonitor, DirectionHint};
use crate::fallback::DirectionArbiter;
use crate::health::{HealthMonitor, RetryPolicy};
use crate::throttle::UpdateThrottle;
use crate::{CoordinatorConfig, DirectionMode, DiscoveryToken, Measurement, PeerId, SessionConfig, SessionState};

/// Whether the state machine permits `from -> to`
pub fn can_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    match (from, to) {
        (Disconnected, _) => false,
        (_, Disconnected) => true,
        (Preparing, TokenReady) | (Preparing, Running) | (TokenReady, Running) => true,
        (Running, Ranging) | (Ranging, Running) => true,
        // Coordinated restart hands out a fresh token
        (TokenReady, Preparing) | (Running, Preparing) | (Ranging, Preparing) => true,
        (Suspended, Suspended) => false,
        (_, Suspended) => true,
        (Suspended, Running) | (Suspended, Preparing) | (Suspended, TokenReady) => true,
        _ => false,
    }
}

/// Timer tasks owned by a session. Dropping the set aborts them.
#[derive(Default)]
pub(crate) struct SessionTimers {
    pub health: Option<JoinHandle<()>>,
    pub direction: Option<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn cancel_health(&mut self) {
        if let Some(handle) = self.health.take() {
            handle.abort();
        }
    }

    pub fn cancel_direction(&mut self) {
        if let Some(handle) = self.direction.take() {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_health();
        self.cancel_direction();
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Mutable per-peer state
pub(crate) struct PeerSession {
    pub id: Uuid,
    pub peer: PeerId,
    pub state: SessionState,
    /// State to return to when a suspension ends
    pub resume_state: Option<SessionState>,
    pub local_token: DiscoveryToken,
    pub remote_token: Option<DiscoveryToken>,
    /// Last configuration issued to the provider
    pub config: Option<SessionConfig>,
    pub last_measurement: Option<Measurement>,
    pub has_measured: bool,
    pub established_announced: bool,
    pub orientation_assist_disabled: bool,
    pub health: HealthMonitor,
    pub arbiter: DirectionArbiter,
    pub throttle: UpdateThrottle,
    pub convergence: ConvergenceMonitor,
    pub timers: SessionTimers,
}

impl PeerSession {
    pub fn new(peer: PeerId, local_token: DiscoveryToken, config: &CoordinatorConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: SessionState::Preparing,
            resume_state: None,
            local_token,
            remote_token: None,
            config: None,
            last_measurement: None,
            has_measured: false,
            established_announced: false,
            orientation_assist_disabled: false,
            health: HealthMonitor::new(RetryPolicy::from_config(config)),
            arbiter: DirectionArbiter::new(),
            throttle: UpdateThrottle::new(
                config.distance_threshold,
                config.direction_threshold_degrees,
                config.diagnostic_log_interval,
            ),
            convergence: ConvergenceMonitor::new(config.convergence_window, config.max_direction_hints),
            timers: SessionTimers::default(),
        }
    }

    /// Apply a transition; returns false when it is a no-op or not permitted
    pub fn transition(&mut self, to: SessionState) -> bool {
        if self.state == to || !can_transition(self.state, to) {
            return false;
        }
        self.state = to;
        true
    }

    /// True until the provider has run, including while suspended before start
    pub fn awaiting_remote_token(&self) -> bool {
        match self.state {
            SessionState::Suspended => self.resume_state.map(|s| s.is_prepared()).unwrap_or(false),
            state => state.is_prepared(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            peer: self.peer.clone(),
            state: self.state,
            direction_mode: self.arbiter.mode(),
            permanently_failed_direction: self.arbiter.is_permanently_failed(),
            retry_count: self.health.retry_count(),
            retries_exhausted: self.health.is_exhausted(),
            orientation_assist: self.config.map(|c| c.orientation_assist).unwrap_or(false),
            last_measurement: self.last_measurement.clone(),
            published_measurement: self.throttle.last_published().cloned(),
            hints: self.convergence.hints().to_vec(),
        }
    }
}

/// Read-only view of a session for callers and tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub peer: PeerId,
    pub state: SessionState,
    pub direction_mode: DirectionMode,
    pub permanently_failed_direction: bool,
    pub retry_count: u32,
    pub retries_exhausted: bool,
    pub orientation_assist: bool,
    pub last_measurement: Option<Measurement>,
    pub published_measurement: Option<Measurement>,
    pub hints: Vec<DirectionHint>,
}
