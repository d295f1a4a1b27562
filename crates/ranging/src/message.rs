// Wire messages exchanged with a peer over the transport layer

use serde::{Deserialize, Serialize};

use crate::fallback::GeoPoint;
use crate::{CapabilitySet, DiscoveryToken, Result};

/// Ranging-related peer-to-peer messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    DiscoveryToken { token: DiscoveryToken },
    Capabilities { capabilities: CapabilitySet },
    /// Ask the peer to tear down and re-exchange tokens
    RestartRequest { attempt: u32 },
    Location { location: GeoPoint },
    StopRanging,
}

impl PeerMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
