use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{RangingError, Result};

/// Unique identifier for a remote peer, as handed out by the transport layer
pub type PeerId = String;

/// Length in bytes of tokens generated locally
const TOKEN_LEN: usize = 32;

/// Opaque credential a device generates and must share before ranging can begin
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryToken(Vec<u8>);

impl DiscoveryToken {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(RangingError::InvalidToken("token is empty".to_string()));
        }
        Ok(Self(bytes))
    }

    /// Random token, used by providers that do not supply their own
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_base58(encoded: &str) -> Result<Self> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| RangingError::InvalidToken(e.to_string()))?;
        Self::from_bytes(bytes)
    }
}

// Tokens are credentials; never print them in full.
impl std::fmt::Debug for DiscoveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoded = self.to_base58();
        let prefix: String = encoded.chars().take(6).collect();
        write!(f, "DiscoveryToken({}…)", prefix)
    }
}

impl Serialize for DiscoveryToken {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for DiscoveryToken {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        DiscoveryToken::from_base58(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Direction to the peer in the device frame (x right, y up, -z forward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return *self;
        }
        Self::new(self.x / len, self.y / len, self.z / len)
    }

    /// Largest absolute per-component difference
    pub fn max_component_delta(&self, other: &Vector3) -> f32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }

    /// Angle to another vector in degrees
    pub fn angle_to(&self, other: &Vector3) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        let dot = (a.x * b.x + a.y * b.y + a.z * b.z).clamp(-1.0, 1.0);
        dot.acos().to_degrees()
    }
}

/// A single reading reported by the ranging provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Distance in metres
    pub distance: f32,
    pub direction: Option<Vector3>,
    pub measured_at: DateTime<Utc>,
}

impl Measurement {
    pub fn new(distance: f32, direction: Option<Vector3>) -> Self {
        Self {
            distance,
            direction,
            measured_at: Utc::now(),
        }
    }
}

/// Lifecycle of a per-peer ranging session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Preparing,
    TokenReady,
    Running,
    Ranging,
    Suspended,
    Disconnected,
}

impl SessionState {
    /// Prepared but not yet started; `prepare` is idempotent here
    pub fn is_prepared(&self) -> bool {
        matches!(self, SessionState::Preparing | SessionState::TokenReady)
    }

    /// Provider is actively running for this session
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Ranging)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Preparing => write!(f, "Preparing"),
            SessionState::TokenReady => write!(f, "TokenReady"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Ranging => write!(f, "Ranging"),
            SessionState::Suspended => write!(f, "Suspended"),
            SessionState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Where the direction reported for a peer comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectionMode {
    Precise,
    ApproximateFallback,
    Unavailable,
}

impl std::fmt::Display for DirectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectionMode::Precise => write!(f, "precise"),
            DirectionMode::ApproximateFallback => write!(f, "approximate_fallback"),
            DirectionMode::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Configuration handed to the provider when a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub direction_enabled: bool,
    pub orientation_assist: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_base58_roundtrip() {
        let token = DiscoveryToken::generate();
        let decoded = DiscoveryToken::from_base58(&token.to_base58()).unwrap();
        assert_eq!(token, decoded);
        assert_eq!(decoded.as_bytes().len(), TOKEN_LEN);
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(DiscoveryToken::from_bytes(Vec::new()).is_err());
        assert!(DiscoveryToken::from_base58("0OIl").is_err());
    }

    #[test]
    fn test_token_debug_is_truncated() {
        let token = DiscoveryToken::generate();
        let debug = format!("{:?}", token);
        assert!(!debug.contains(&token.to_base58()));
    }

    #[test]
    fn test_vector_angle() {
        let forward = Vector3::new(0.0, 0.0, -1.0);
        let right = Vector3::new(1.0, 0.0, 0.0);
        assert!((forward.angle_to(&right) - 90.0).abs() < 0.01);
        assert!(forward.angle_to(&forward) < 0.01);
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Preparing.is_prepared());
        assert!(SessionState::TokenReady.is_prepared());
        assert!(!SessionState::Running.is_prepared());
        assert!(SessionState::Ranging.is_active());
        assert!(!SessionState::Suspended.is_active());
    }
}
