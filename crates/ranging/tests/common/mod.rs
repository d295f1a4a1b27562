#![allow(dead_code)]

use async_trait::async_trait;
use ranging::{
    CapabilitySet, CoordinatorConfig, DiscoveryToken, GeoPoint, HardwareClass, LocationProvider,
    PeerId, RangingError, RangingProvider, Result, SessionConfig, SessionCoordinator,
    SessionDelegate, SessionState,
};
use std::sync::{Arc, Mutex};

/// Calls observed by the mock provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Create(PeerId),
    Run(PeerId, SessionConfig),
    Stop(PeerId),
}

/// In-memory ranging provider that records every call
pub struct MockRangingProvider {
    capabilities: CapabilitySet,
    calls: Mutex<Vec<ProviderCall>>,
    fail_run: Mutex<bool>,
}

impl MockRangingProvider {
    pub fn new(capabilities: CapabilitySet) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            calls: Mutex::new(Vec::new()),
            fail_run: Mutex::new(false),
        })
    }

    pub fn advanced() -> Arc<Self> {
        Self::new(CapabilitySet::new(HardwareClass::Advanced, true, true, true))
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn run_count(&self, peer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Run(p, _) if p == peer))
            .count()
    }

    pub fn create_count(&self, peer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Create(p) if p == peer))
            .count()
    }

    pub fn stop_count(&self, peer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::Stop(p) if p == peer))
            .count()
    }

    pub fn last_run_config(&self, peer: &str) -> Option<SessionConfig> {
        self.calls().iter().rev().find_map(|c| match c {
            ProviderCall::Run(p, config) if p == peer => Some(*config),
            _ => None,
        })
    }

    pub fn set_fail_run(&self, fail: bool) {
        *self.fail_run.lock().unwrap() = fail;
    }
}

#[async_trait]
impl RangingProvider for MockRangingProvider {
    fn local_capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn create_session(&self, peer: &PeerId) -> Result<DiscoveryToken> {
        self.calls.lock().unwrap().push(ProviderCall::Create(peer.clone()));
        Ok(DiscoveryToken::generate())
    }

    async fn run(&self, peer: &PeerId, config: &SessionConfig, _remote_token: &DiscoveryToken) -> Result<()> {
        if *self.fail_run.lock().unwrap() {
            return Err(RangingError::ProviderError("run rejected".to_string()));
        }
        self.calls.lock().unwrap().push(ProviderCall::Run(peer.clone(), *config));
        Ok(())
    }

    async fn stop(&self, peer: &PeerId) {
        self.calls.lock().unwrap().push(ProviderCall::Stop(peer.clone()));
    }
}

/// Fixed location and heading; records which peers we share with
pub struct MockLocationProvider {
    pub location: Mutex<Option<GeoPoint>>,
    pub heading: Mutex<Option<f64>>,
    pub sharing: Mutex<Vec<PeerId>>,
    pub started: Mutex<usize>,
}

impl MockLocationProvider {
    pub fn new(location: GeoPoint, heading: f64) -> Arc<Self> {
        Arc::new(Self {
            location: Mutex::new(Some(location)),
            heading: Mutex::new(Some(heading)),
            sharing: Mutex::new(Vec::new()),
            started: Mutex::new(0),
        })
    }

    pub fn is_sharing_with(&self, peer: &str) -> bool {
        self.sharing.lock().unwrap().iter().any(|p| p == peer)
    }

    pub fn start_count(&self) -> usize {
        *self.started.lock().unwrap()
    }
}

impl LocationProvider for MockLocationProvider {
    fn current_location(&self) -> Option<GeoPoint> {
        *self.location.lock().unwrap()
    }

    fn current_heading(&self) -> Option<f64> {
        *self.heading.lock().unwrap()
    }

    fn start_sharing(&self, peer: &PeerId) {
        *self.started.lock().unwrap() += 1;
        let mut sharing = self.sharing.lock().unwrap();
        if !sharing.contains(peer) {
            sharing.push(peer.clone());
        }
    }

    fn stop_sharing(&self, peer: &PeerId) {
        self.sharing.lock().unwrap().retain(|p| p != peer);
    }
}

/// Records delegate callbacks
#[derive(Default)]
pub struct RecordingDelegate {
    pub restarts: Mutex<Vec<(PeerId, DiscoveryToken, u32)>>,
    pub states: Mutex<Vec<(PeerId, SessionState)>>,
    pub exhausted: Mutex<Vec<(PeerId, u32)>>,
    pub failures: Mutex<Vec<(PeerId, String)>>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn restart_attempts(&self) -> Vec<u32> {
        self.restarts.lock().unwrap().iter().map(|(_, _, a)| *a).collect()
    }
}

impl SessionDelegate for RecordingDelegate {
    fn restart_requested(&self, peer: &PeerId, fresh_token: &DiscoveryToken, attempt: u32) {
        self.restarts
            .lock()
            .unwrap()
            .push((peer.clone(), fresh_token.clone(), attempt));
    }

    fn session_state_changed(&self, peer: &PeerId, state: SessionState) {
        self.states.lock().unwrap().push((peer.clone(), state));
    }

    fn retries_exhausted(&self, peer: &PeerId, attempts: u32) {
        self.exhausted.lock().unwrap().push((peer.clone(), attempts));
    }

    fn session_failed(&self, peer: &PeerId, error: &RangingError) {
        self.failures.lock().unwrap().push((peer.clone(), error.to_string()));
    }
}

pub fn peer(name: &str) -> PeerId {
    name.to_string()
}

pub fn coordinator(provider: Arc<MockRangingProvider>) -> SessionCoordinator {
    SessionCoordinator::new(provider, None, CoordinatorConfig::default())
}

pub fn coordinator_with_location(
    provider: Arc<MockRangingProvider>,
    location: Arc<MockLocationProvider>,
) -> SessionCoordinator {
    SessionCoordinator::new(provider, Some(location), CoordinatorConfig::default())
}

/// Prepare and start a session with a freshly generated remote token
pub async fn start_ranging(coordinator: &SessionCoordinator, peer: &PeerId) {
    coordinator.prepare_session(peer).await.unwrap();
    coordinator.mark_token_sent(peer).await.unwrap();
    coordinator
        .start_session(peer, DiscoveryToken::generate())
        .await
        .unwrap();
    settle().await;
}

/// Let spawned timer tasks observe the current (paused) time
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
