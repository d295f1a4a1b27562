// Handshake Arbitration Window - detects simultaneous dials between two peers

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::PeerId;

/// Outbound invitation bookkeeping for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeState {
    pub outbound_invite_started_at: Option<Instant>,
    pub abandoned_outbound: bool,
}

/// Classification of an inbound invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundVerdict {
    /// No recent outbound attempt to this peer
    Clear,
    /// Both sides dialled within the window
    Collision,
}

/// Which side proceeds after a collision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionResolution {
    /// Keep our outbound attempt, decline the inbound one
    KeepOutbound,
    /// Abandon our outbound attempt, accept the inbound one
    AcceptInbound,
}

/// Tracks outbound invitations and flags near-simultaneous inbound ones
pub struct HandshakeArbiter {
    window: Duration,
    states: DashMap<PeerId, HandshakeState>,
}

impl HandshakeArbiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            states: DashMap::new(),
        }
    }

    /// Record that we started dialling `peer`
    pub fn record_outbound_invite(&self, peer: &PeerId) {
        debug!(peer = %peer, "Recording outbound invite");
        self.states.insert(
            peer.clone(),
            HandshakeState {
                outbound_invite_started_at: Some(Instant::now()),
                abandoned_outbound: false,
            },
        );
    }

    /// Classify an inbound invitation from `peer`
    pub fn check_inbound(&self, peer: &PeerId) -> InboundVerdict {
        let started_at = self
            .states
            .get(peer)
            .filter(|state| !state.abandoned_outbound)
            .and_then(|state| state.outbound_invite_started_at);

        match started_at {
            Some(at) if at.elapsed() <= self.window => {
                info!(peer = %peer, elapsed = ?at.elapsed(), "Simultaneous dial detected");
                InboundVerdict::Collision
            }
            _ => InboundVerdict::Clear,
        }
    }

    /// Deterministic tie-break: both sides compute the same answer from their ids
    pub fn resolve_collision(local: &PeerId, remote: &PeerId) -> CollisionResolution {
        if local < remote {
            CollisionResolution::KeepOutbound
        } else {
            CollisionResolution::AcceptInbound
        }
    }

    pub fn mark_abandoned(&self, peer: &PeerId) {
        if let Some(mut state) = self.states.get_mut(peer) {
            state.abandoned_outbound = true;
            debug!(peer = %peer, "Outbound invite abandoned");
        }
    }

    pub fn is_abandoned(&self, peer: &PeerId) -> bool {
        self.states
            .get(peer)
            .map(|state| state.abandoned_outbound)
            .unwrap_or(false)
    }

    pub fn state(&self, peer: &PeerId) -> Option<HandshakeState> {
        self.states.get(peer).map(|state| *state)
    }

    /// Connection established or definitively failed
    pub fn clear(&self, peer: &PeerId) {
        self.states.remove(peer);
    }

    pub fn clear_all(&self) {
        self.states.clear();
    }
}
