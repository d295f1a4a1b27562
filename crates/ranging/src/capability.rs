// Capability Model - what each device can measure and what a pairing can produce

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CoordinatorConfig, SessionConfig};

/// Class of ranging hardware in a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareClass {
    None,
    /// First-generation chip; direction converges slowly or not at all
    Basic,
    Advanced,
}

/// Ranging capabilities of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub hardware_class: HardwareClass,
    pub supports_distance: bool,
    pub supports_direction: bool,
    pub supports_orientation_assist: bool,
}

impl CapabilitySet {
    pub fn new(
        hardware_class: HardwareClass,
        supports_distance: bool,
        supports_direction: bool,
        supports_orientation_assist: bool,
    ) -> Self {
        Self {
            hardware_class,
            supports_distance,
            supports_direction,
            supports_orientation_assist,
        }
    }

    /// A device without ranging hardware
    pub fn local_unsupported() -> Self {
        Self::new(HardwareClass::None, false, false, false)
    }

    /// Assumed for a peer that has not announced its capabilities yet.
    /// Optimistic so the direction timer, not a guess, decides the outcome.
    pub fn unknown_peer() -> Self {
        Self::new(HardwareClass::Advanced, true, true, false)
    }

    pub fn supports_ranging(&self) -> bool {
        self.hardware_class != HardwareClass::None && self.supports_distance
    }

    /// Hardware whose direction is known to be unreliable
    pub fn has_limited_direction(&self) -> bool {
        self.hardware_class == HardwareClass::Basic
    }
}

/// Result of comparing two devices' capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub distance: bool,
    pub direction: bool,
}

/// Distance needs either side, direction needs both
pub fn is_compatible(local: &CapabilitySet, remote: &CapabilitySet) -> Compatibility {
    Compatibility {
        distance: local.supports_distance || remote.supports_distance,
        direction: local.supports_direction && remote.supports_direction,
    }
}

/// Decision taken at session start for one pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPlan {
    pub compatibility: Compatibility,
    pub orientation_assist: bool,
    /// Timeout for the first direction-bearing measurement, if direction is expected
    pub direction_timeout: Option<Duration>,
}

impl SessionPlan {
    pub fn expects_direction(&self) -> bool {
        self.compatibility.direction
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            direction_enabled: self.compatibility.direction,
            orientation_assist: self.orientation_assist,
        }
    }
}

/// Plan a session between the local device and a peer
pub fn plan_session(
    local: &CapabilitySet,
    remote: &CapabilitySet,
    assist_disabled: bool,
    config: &CoordinatorConfig,
) -> SessionPlan {
    let compatibility = is_compatible(local, remote);

    let direction_timeout = if !compatibility.direction {
        None
    } else if local.has_limited_direction() || remote.has_limited_direction() {
        Some(config.limited_direction_timeout)
    } else {
        Some(config.direction_timeout)
    };

    SessionPlan {
        compatibility,
        orientation_assist: compatibility.direction
            && local.supports_orientation_assist
            && !assist_disabled,
        direction_timeout,
    }
}
