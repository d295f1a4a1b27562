// Direction Fallback Arbiter - hardware direction or a bearing between both devices' locations
// Escalation only moves forward: a direction timeout fails the peer for the rest of its session

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::SessionPlan;
use crate::{DirectionMode, Vector3};

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A location reported by a location provider, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance in metres (haversine)
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial bearing towards `other`, degrees clockwise from true north in [0, 360)
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }
}

/// Direction vector for a bearing seen from a device facing `heading`
pub fn bearing_to_vector(bearing: f64, heading: f64) -> Vector3 {
    let relative = (bearing - heading).to_radians();
    Vector3::new(relative.sin() as f32, 0.0, -(relative.cos() as f32))
}

/// Why fallback was activated for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackCause {
    /// The pairing cannot produce native direction
    Capability,
    /// The hardware never delivered a direction in time
    DirectionTimeout,
}

/// What the coordinator must do after `on_start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// Start location sharing; fallback just became active
    ActivateFallback(FallbackCause),
    /// Arm the one-shot direction timer
    ArmTimer(Duration),
    Nothing,
}

/// What the coordinator must do after a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementAction {
    pub cancel_timer: bool,
    pub stop_sharing: bool,
    pub mode_changed: bool,
}

/// Per-peer direction sourcing state
#[derive(Debug, Clone)]
pub struct DirectionArbiter {
    mode: DirectionMode,
    permanently_failed: bool,
    awaiting_direction: bool,
    sharing_location: bool,
    cause: Option<FallbackCause>,
    remote_location: Option<GeoPoint>,
}

impl Default for DirectionArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectionArbiter {
    pub fn new() -> Self {
        Self {
            mode: DirectionMode::Unavailable,
            permanently_failed: false,
            awaiting_direction: false,
            sharing_location: false,
            cause: None,
            remote_location: None,
        }
    }

    pub fn mode(&self) -> DirectionMode {
        self.mode
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.permanently_failed
    }

    pub fn is_awaiting_direction(&self) -> bool {
        self.awaiting_direction
    }

    pub fn is_sharing_location(&self) -> bool {
        self.sharing_location
    }

    pub fn fallback_cause(&self) -> Option<FallbackCause> {
        self.cause
    }

    /// Decide direction sourcing when the session (re)starts
    pub fn on_start(&mut self, plan: &SessionPlan) -> StartAction {
        self.awaiting_direction = false;

        if self.permanently_failed {
            return self.activate(FallbackCause::DirectionTimeout);
        }
        if !plan.expects_direction() {
            return self.activate(FallbackCause::Capability);
        }
        if self.mode == DirectionMode::Precise {
            return StartAction::Nothing;
        }

        match plan.direction_timeout {
            Some(timeout) => {
                self.awaiting_direction = true;
                StartAction::ArmTimer(timeout)
            }
            None => self.activate(FallbackCause::Capability),
        }
    }

    /// The direction timer fired; returns the action to take
    pub fn on_direction_timeout(&mut self) -> StartAction {
        if !self.awaiting_direction {
            return StartAction::Nothing;
        }
        self.awaiting_direction = false;
        self.permanently_failed = true;
        self.activate(FallbackCause::DirectionTimeout)
    }

    pub fn on_measurement(&mut self, has_direction: bool) -> MeasurementAction {
        let mut action = MeasurementAction::default();
        if !has_direction || self.permanently_failed {
            return action;
        }

        if self.awaiting_direction {
            self.awaiting_direction = false;
            action.cancel_timer = true;
        }
        if self.mode != DirectionMode::Precise {
            self.mode = DirectionMode::Precise;
            self.cause = None;
            action.mode_changed = true;
        }
        if self.sharing_location {
            self.sharing_location = false;
            action.stop_sharing = true;
        }
        action
    }

    /// Stop any fallback activity; returns whether location sharing must be stopped
    pub fn deactivate(&mut self) -> bool {
        self.awaiting_direction = false;
        std::mem::replace(&mut self.sharing_location, false)
    }

    pub fn set_remote_location(&mut self, location: GeoPoint) {
        self.remote_location = Some(location);
    }

    pub fn remote_location(&self) -> Option<GeoPoint> {
        self.remote_location
    }

    /// Approximate direction from the local position and heading
    pub fn fallback_direction(&self, local: &GeoPoint, heading: f64) -> Option<Vector3> {
        if self.mode != DirectionMode::ApproximateFallback {
            return None;
        }
        let remote = self.remote_location?;
        Some(bearing_to_vector(local.bearing_to(&remote), heading))
    }

    /// Geodesic distance to the peer while in fallback
    pub fn fallback_distance(&self, local: &GeoPoint) -> Option<f32> {
        if self.mode != DirectionMode::ApproximateFallback {
            return None;
        }
        self.remote_location.map(|remote| local.distance_to(&remote) as f32)
    }

    fn activate(&mut self, cause: FallbackCause) -> StartAction {
        self.mode = DirectionMode::ApproximateFallback;
        self.cause = Some(cause);
        if self.sharing_location {
            return StartAction::Nothing;
        }
        self.sharing_location = true;
        StartAction::ActivateFallback(cause)
    }
}
