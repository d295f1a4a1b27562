// Collaborator seams: ranging hardware, location, and the restart delegate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::convergence::ConvergenceStatus;
use crate::fallback::GeoPoint;
use crate::{CapabilitySet, DiscoveryToken, Measurement, PeerId, RangingError, Result, SessionConfig, SessionState};

/// Token-based ranging hardware
#[async_trait]
pub trait RangingProvider: Send + Sync {
    /// Capabilities of the local hardware
    fn local_capabilities(&self) -> CapabilitySet;

    /// Create a provider session for `peer` and return its local token
    async fn create_session(&self, peer: &PeerId) -> Result<DiscoveryToken>;

    /// Run (or re-run) ranging with the given configuration
    async fn run(&self, peer: &PeerId, config: &SessionConfig, remote_token: &DiscoveryToken) -> Result<()>;

    /// Stop and release the provider session for `peer`
    async fn stop(&self, peer: &PeerId);
}

/// Asynchronous callbacks from the ranging provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderEvent {
    Measurement(Measurement),
    /// The peer is no longer being tracked
    TrackingLost,
    Suspended,
    SuspensionEnded,
    Convergence(ConvergenceStatus),
    /// The orientation-assist subsystem failed; ranging itself continues
    OrientationFault(String),
    /// The provider session is unusable
    Invalidated(InvalidationReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    PermissionDenied,
    ResourceUsageTimeout,
    Other(String),
}

impl From<&InvalidationReason> for RangingError {
    fn from(reason: &InvalidationReason) -> Self {
        match reason {
            InvalidationReason::PermissionDenied => {
                RangingError::PermissionDenied("nearby interaction".to_string())
            }
            InvalidationReason::ResourceUsageTimeout => {
                RangingError::SessionInvalidated("resource usage timeout".to_string())
            }
            InvalidationReason::Other(reason) => RangingError::SessionInvalidated(reason.clone()),
        }
    }
}

/// Location and compass source used for the approximate direction fallback
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<GeoPoint>;

    /// Compass heading in degrees clockwise from true north
    fn current_heading(&self) -> Option<f64>;

    /// Begin continuously sharing our location with `peer`
    fn start_sharing(&self, peer: &PeerId);

    fn stop_sharing(&self, peer: &PeerId);
}

/// Receives coordinator decisions that need the transport layer.
/// All calls are fire-and-forget and are made while the coordinator holds its lock,
/// so implementations must not call back into the coordinator synchronously.
pub trait SessionDelegate: Send + Sync {
    /// Deliver `fresh_token` to `peer` and call `start_session` with the peer's fresh token
    fn restart_requested(&self, peer: &PeerId, fresh_token: &DiscoveryToken, attempt: u32);

    fn session_state_changed(&self, _peer: &PeerId, _state: SessionState) {}

    fn retries_exhausted(&self, _peer: &PeerId, _attempts: u32) {}

    fn session_failed(&self, _peer: &PeerId, _error: &RangingError) {}
}
