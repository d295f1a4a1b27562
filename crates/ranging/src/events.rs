// Coordinator events - what observers see of the per-peer bookkeeping

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::convergence::DirectionHint;
use crate::fallback::FallbackCause;
use crate::{DirectionMode, PeerId, SessionState, Vector3};

/// Events published on significant-change boundaries only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    StateChanged {
        peer: PeerId,
        state: SessionState,
        timestamp: i64,
    },
    MeasurementPublished {
        peer: PeerId,
        distance: f32,
        direction: Option<Vector3>,
        timestamp: i64,
    },
    /// First measurement of a session
    RangingEstablished {
        peer: PeerId,
        timestamp: i64,
    },
    DirectionModeChanged {
        peer: PeerId,
        mode: DirectionMode,
        cause: Option<FallbackCause>,
        timestamp: i64,
    },
    DirectionHintsChanged {
        peer: PeerId,
        hints: Vec<DirectionHint>,
        timestamp: i64,
    },
    RestartRequested {
        peer: PeerId,
        attempt: u32,
        coordinated: bool,
        timestamp: i64,
    },
    RetriesExhausted {
        peer: PeerId,
        attempts: u32,
        timestamp: i64,
    },
    SessionInvalidated {
        peer: PeerId,
        reason: String,
        timestamp: i64,
    },
    OrientationAssistDisabled {
        peer: PeerId,
        reason: String,
        timestamp: i64,
    },
    SessionResumed {
        peer: PeerId,
        /// Resumed by foreground recovery rather than the provider callback
        forced: bool,
        timestamp: i64,
    },
}

impl CoordinatorEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            CoordinatorEvent::StateChanged { peer, .. }
            | CoordinatorEvent::MeasurementPublished { peer, .. }
            | CoordinatorEvent::RangingEstablished { peer, .. }
            | CoordinatorEvent::DirectionModeChanged { peer, .. }
            | CoordinatorEvent::DirectionHintsChanged { peer, .. }
            | CoordinatorEvent::RestartRequested { peer, .. }
            | CoordinatorEvent::RetriesExhausted { peer, .. }
            | CoordinatorEvent::SessionInvalidated { peer, .. }
            | CoordinatorEvent::OrientationAssistDisabled { peer, .. }
            | CoordinatorEvent::SessionResumed { peer, .. } => peer,
        }
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Broadcast fan-out for coordinator events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CoordinatorEvent) {
        // Sending fails only when nobody is subscribed
        if self.tx.send(event).is_err() {
            trace!("No subscribers for coordinator event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
