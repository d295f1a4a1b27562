// Session Coordinator - per-peer ranging sessions, timers, fallback and recovery
// All per-peer state sits behind one tokio Mutex. Timer tasks hold a weak handle and the id
// of the session that armed them; a timer that outlives its session does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{plan_session, CapabilitySet};
use crate::convergence::{ConvergenceOutcome, ConvergenceStatus, DirectionHint};
use crate::events::{now_ts, CoordinatorEvent, EventBus};
use crate::fallback::{FallbackCause, GeoPoint, StartAction};
use crate::handshake::HandshakeArbiter;
use crate::health::HealthVerdict;
use crate::lifecycle::LifecycleManager;
use crate::message::PeerMessage;
use crate::provider::{LocationProvider, ProviderEvent, RangingProvider, SessionDelegate};
use crate::session::{PeerSession, SessionSnapshot};
use crate::{
    CoordinatorConfig, DirectionMode, DiscoveryToken, ErrorContext, Measurement, PeerId,
    RangingError, Result, SessionConfig, SessionState, Vector3,
};

type Delegate = Arc<dyn SessionDelegate>;

struct CoordinatorState {
    sessions: HashMap<PeerId, PeerSession>,
    peer_capabilities: HashMap<PeerId, CapabilitySet>,
    delegate: Option<Delegate>,
    recovery_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: CoordinatorConfig,
    provider: Arc<dyn RangingProvider>,
    location: Option<Arc<dyn LocationProvider>>,
    local_capabilities: CapabilitySet,
    state: Mutex<CoordinatorState>,
    events: EventBus,
    handshake: HandshakeArbiter,
    lifecycle: LifecycleManager,
}

/// Per-peer ranging session coordinator. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        provider: Arc<dyn RangingProvider>,
        location: Option<Arc<dyn LocationProvider>>,
        config: CoordinatorConfig,
    ) -> Self {
        let local_capabilities = provider.local_capabilities();
        info!(
            "Initializing session coordinator: hardware={:?}, direction={}, assist={}",
            local_capabilities.hardware_class,
            local_capabilities.supports_direction,
            local_capabilities.supports_orientation_assist
        );

        Self {
            inner: Arc::new(Inner {
                events: EventBus::new(config.event_channel_capacity),
                handshake: HandshakeArbiter::new(config.handshake_window),
                lifecycle: LifecycleManager::new(),
                state: Mutex::new(CoordinatorState {
                    sessions: HashMap::new(),
                    peer_capabilities: HashMap::new(),
                    delegate: None,
                    recovery_task: None,
                }),
                config,
                provider,
                location,
                local_capabilities,
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn local_capabilities(&self) -> CapabilitySet {
        self.inner.local_capabilities
    }

    /// Announcement to send to a newly connected peer
    pub fn capabilities_message(&self) -> PeerMessage {
        PeerMessage::Capabilities {
            capabilities: self.inner.local_capabilities,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn handshake(&self) -> &HandshakeArbiter {
        &self.inner.handshake
    }

    pub async fn set_delegate(&self, delegate: Delegate) {
        self.inner.state.lock().await.delegate = Some(delegate);
    }

    pub async fn clear_delegate(&self) {
        self.inner.state.lock().await.delegate = None;
    }

    pub async fn record_peer_capabilities(&self, peer: &PeerId, capabilities: CapabilitySet) {
        debug!(peer = %peer, ?capabilities, "Caching peer capabilities");
        self.inner
            .state
            .lock()
            .await
            .peer_capabilities
            .insert(peer.clone(), capabilities);
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Prepare a session and return the local token to share with `peer`.
    /// Idempotent while the session is still prepared.
    pub async fn prepare_session(&self, peer: &PeerId) -> Result<DiscoveryToken> {
        if !self.inner.local_capabilities.supports_ranging() {
            warn!(peer = %peer, "Ranging requested on a device without ranging support");
            return Err(RangingError::RangingUnsupported);
        }

        let mut st = self.inner.state.lock().await;

        if let Some(existing) = st.sessions.get(peer) {
            if existing.state.is_prepared() {
                debug!(peer = %peer, "Reusing prepared session");
                return Ok(existing.local_token.clone());
            }
            info!(peer = %peer, state = %existing.state, "Tearing down stale session before prepare");
            self.teardown(&mut st, peer, None).await;
        }

        let token = self.inner.provider.create_session(peer).await?;
        let session = PeerSession::new(peer.clone(), token.clone(), &self.inner.config);
        info!(peer = %peer, session_id = %session.id, "Session prepared");
        st.sessions.insert(peer.clone(), session);

        let delegate = st.delegate.clone();
        self.announce_state(peer, SessionState::Preparing, delegate.as_ref());
        Ok(token)
    }

    /// The local token has been delivered to the peer
    pub async fn mark_token_sent(&self, peer: &PeerId) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        let delegate = st.delegate.clone();
        let session = st
            .sessions
            .get_mut(peer)
            .ok_or_else(|| RangingError::SessionNotFound(peer.clone()))?;

        if session.state == SessionState::Preparing {
            self.transition(session, SessionState::TokenReady, delegate.as_ref());
        }
        Ok(())
    }

    /// Start ranging with the peer's token. No-op if already running.
    pub async fn start_session(&self, peer: &PeerId, remote_token: DiscoveryToken) -> Result<()> {
        let mut st = self.inner.state.lock().await;
        let delegate = st.delegate.clone();
        let remote_capabilities = Self::remote_capabilities(&st, peer);

        let session = st
            .sessions
            .get_mut(peer)
            .ok_or_else(|| RangingError::SessionNotFound(peer.clone()))?;

        match session.state {
            SessionState::Preparing | SessionState::TokenReady => {
                self.begin_ranging(session, remote_capabilities, remote_token, delegate.as_ref())
                    .await
            }
            SessionState::Suspended if session.awaiting_remote_token() => {
                // Run once the suspension ends
                debug!(peer = %peer, "Deferring start until suspension ends");
                session.remote_token = Some(remote_token);
                Ok(())
            }
            SessionState::Running | SessionState::Ranging | SessionState::Suspended => {
                debug!(peer = %peer, state = %session.state, "Session already started");
                Ok(())
            }
            SessionState::Disconnected => Err(RangingError::SessionNotPrepared {
                peer: peer.clone(),
                state: session.state,
            }),
        }
    }

    /// Run the provider for a prepared session and arm its timers
    async fn begin_ranging(
        &self,
        session: &mut PeerSession,
        remote_capabilities: CapabilitySet,
        remote_token: DiscoveryToken,
        delegate: Option<&Delegate>,
    ) -> Result<()> {
        let peer = session.peer.clone();
        let plan = plan_session(
            &self.inner.local_capabilities,
            &remote_capabilities,
            session.orientation_assist_disabled,
            &self.inner.config,
        );
        let config = plan.session_config();

        self.inner.provider.run(&peer, &config, &remote_token).await?;

        session.remote_token = Some(remote_token);
        session.config = Some(config);
        self.transition(session, SessionState::Running, delegate);
        info!(
            peer = %peer,
            session_id = %session.id,
            direction = config.direction_enabled,
            assist = config.orientation_assist,
            "Ranging started"
        );

        session.timers.cancel_health();
        session.timers.health = Some(self.spawn_health_timer(peer.clone(), session.id));

        session.timers.cancel_direction();
        match session.arbiter.on_start(&plan) {
            StartAction::ActivateFallback(cause) => self.activate_fallback(session, cause),
            StartAction::ArmTimer(timeout) => {
                debug!(peer = %peer, ?timeout, "Waiting for first direction");
                session.timers.direction =
                    Some(self.spawn_direction_timer(peer.clone(), session.id, timeout));
            }
            StartAction::Nothing => {}
        }

        Ok(())
    }

    /// Stop a session with full cleanup. Idempotent.
    pub async fn stop_session(&self, peer: &PeerId) {
        let mut st = self.inner.state.lock().await;
        if !self.teardown(&mut st, peer, None).await {
            debug!(peer = %peer, "Stop requested for peer without a session");
        }
    }

    /// Stop every session. No session can be prepared until this returns.
    pub async fn stop_all_sessions(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some(task) = st.recovery_task.take() {
            task.abort();
        }

        let peers: Vec<PeerId> = st.sessions.keys().cloned().collect();
        info!("Stopping {} sessions", peers.len());
        for peer in peers {
            self.teardown(&mut st, &peer, None).await;
        }
    }

    /// The transport lost the peer; drop everything we know about it
    pub async fn handle_peer_disconnected(&self, peer: &PeerId) {
        let mut st = self.inner.state.lock().await;
        self.teardown(&mut st, peer, None).await;
        st.peer_capabilities.remove(peer);
        self.inner.handshake.clear(peer);
        info!(peer = %peer, "Peer disconnected");
    }

    /// Feed a location received from the peer into the fallback bearing
    pub async fn handle_peer_location(&self, peer: &PeerId, location: GeoPoint) {
        let mut st = self.inner.state.lock().await;
        if let Some(session) = st.sessions.get_mut(peer) {
            session.arbiter.set_remote_location(location);
        }
    }

    /// Handle a ranging message from the peer, returning the reply to send, if any
    pub async fn handle_peer_message(&self, peer: &PeerId, message: PeerMessage) -> Result<Option<PeerMessage>> {
        match message {
            PeerMessage::DiscoveryToken { token } => match self.awaiting_remote_token(peer).await {
                Some(true) => {
                    self.start_session(peer, token).await?;
                    Ok(None)
                }
                Some(false) => {
                    // The peer restarted its side; keep our record and hand out a fresh token
                    let local = self.restart_in_place(peer).await?;
                    self.mark_token_sent(peer).await?;
                    self.start_session(peer, token).await?;
                    Ok(Some(PeerMessage::DiscoveryToken { token: local }))
                }
                None => {
                    let local = self.prepare_session(peer).await?;
                    self.mark_token_sent(peer).await?;
                    self.start_session(peer, token).await?;
                    Ok(Some(PeerMessage::DiscoveryToken { token: local }))
                }
            },
            PeerMessage::Capabilities { capabilities } => {
                self.record_peer_capabilities(peer, capabilities).await;
                Ok(None)
            }
            PeerMessage::RestartRequest { attempt } => {
                info!(peer = %peer, attempt, "Peer requested a coordinated restart");
                let local = match self.awaiting_remote_token(peer).await {
                    Some(_) => self.restart_in_place(peer).await?,
                    None => self.prepare_session(peer).await?,
                };
                self.mark_token_sent(peer).await?;
                Ok(Some(PeerMessage::DiscoveryToken { token: local }))
            }
            PeerMessage::Location { location } => {
                self.handle_peer_location(peer, location).await;
                Ok(None)
            }
            PeerMessage::StopRanging => {
                self.stop_session(peer).await;
                Ok(None)
            }
        }
    }

    /// None without a session, otherwise whether it still waits for the peer's token
    async fn awaiting_remote_token(&self, peer: &PeerId) -> Option<bool> {
        self.inner
            .state
            .lock()
            .await
            .sessions
            .get(peer)
            .map(|s| s.awaiting_remote_token())
    }

    /// Return the session to Preparing with a fresh token, keeping retry and direction state.
    /// A session that never started keeps its pending token.
    async fn restart_in_place(&self, peer: &PeerId) -> Result<DiscoveryToken> {
        let mut st = self.inner.state.lock().await;
        let delegate = st.delegate.clone();
        let session = st
            .sessions
            .get_mut(peer)
            .ok_or_else(|| RangingError::SessionNotFound(peer.clone()))?;

        if session.awaiting_remote_token() {
            debug!(peer = %peer, "Restart before start, reusing pending token");
            // Any token deferred during suspension predates the peer's restart
            session.remote_token = None;
            return Ok(session.local_token.clone());
        }
        self.reissue_token(session, delegate.as_ref()).await
    }

    // ---------------------------------------------------------------------
    // Provider callbacks
    // ---------------------------------------------------------------------

    /// Funnel a provider callback through the serialization boundary
    pub async fn handle_provider_event(&self, peer: &PeerId, event: ProviderEvent) {
        let mut st = self.inner.state.lock().await;
        let delegate = st.delegate.clone();

        if let ProviderEvent::Invalidated(reason) = &event {
            let err = RangingError::from(reason);
            let mut context = ErrorContext::new().with_peer_id(peer.clone());
            if let Some(session) = st.sessions.get(peer) {
                context = context.with_session_id(session.id);
            }
            err.log_with_context(&context);

            if self.teardown(&mut st, peer, Some(&err)).await {
                self.inner.events.publish(CoordinatorEvent::SessionInvalidated {
                    peer: peer.clone(),
                    reason: err.to_string(),
                    timestamp: now_ts(),
                });
            }
            return;
        }

        let remote_capabilities = Self::remote_capabilities(&st, peer);
        let session = match st.sessions.get_mut(peer) {
            Some(session) => session,
            None => {
                debug!(peer = %peer, "Provider event for peer without a session");
                return;
            }
        };

        match event {
            ProviderEvent::Measurement(measurement) => {
                self.on_measurement(session, measurement, delegate.as_ref());
            }
            ProviderEvent::TrackingLost => {
                if session.state == SessionState::Ranging {
                    info!(peer = %peer, "Tracking lost, waiting for the peer to reappear");
                    self.transition(session, SessionState::Running, delegate.as_ref());
                }
            }
            ProviderEvent::Suspended => {
                if session.state != SessionState::Suspended {
                    session.resume_state = Some(session.state);
                    self.transition(session, SessionState::Suspended, delegate.as_ref());
                }
            }
            ProviderEvent::SuspensionEnded => {
                self.resume(session, remote_capabilities, false, delegate.as_ref()).await;
            }
            ProviderEvent::Convergence(status) => {
                self.on_convergence(session, &status);
            }
            ProviderEvent::OrientationFault(reason) => {
                self.disable_orientation_assist(session, reason).await;
            }
            ProviderEvent::Invalidated(_) => {}
        }
    }

    /// Pump provider callbacks from a channel until it closes
    pub fn attach_provider_events(&self, mut rx: mpsc::Receiver<(PeerId, ProviderEvent)>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some((peer, event)) = rx.recv().await {
                let coordinator = match Self::from_weak(&weak) {
                    Some(coordinator) => coordinator,
                    None => break,
                };
                coordinator.handle_provider_event(&peer, event).await;
            }
            debug!("Provider event channel closed");
        })
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub async fn handle_app_backgrounded(&self) {
        self.inner.lifecycle.on_background().await;
    }

    /// Schedule a suspension recovery scan after every foreground signal
    pub async fn handle_app_foregrounded(&self) {
        match self.inner.lifecycle.on_foreground().await {
            Some(elapsed) => debug!(?elapsed, "Foregrounded after background period"),
            None => debug!("Foreground signal without a background period, scanning anyway"),
        }

        let grace = self.inner.config.suspension_recovery_grace;
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            sleep(grace).await;
            if let Some(coordinator) = Self::from_weak(&weak) {
                coordinator.run_scheduled_recovery().await;
            }
        });

        let mut st = self.inner.state.lock().await;
        if let Some(previous) = st.recovery_task.replace(task) {
            previous.abort();
        }
    }

    /// Force-resume every session still marked suspended; returns how many resumed
    pub async fn recover_suspended_sessions(&self) -> usize {
        let mut st = self.inner.state.lock().await;
        self.recover_locked(&mut st).await
    }

    async fn run_scheduled_recovery(&self) {
        let mut st = self.inner.state.lock().await;
        // Detach our own handle; stop_all no longer needs to abort us
        st.recovery_task.take();
        let resumed = self.recover_locked(&mut st).await;
        if resumed > 0 {
            info!("Suspension recovery resumed {} sessions", resumed);
        }
    }

    async fn recover_locked(&self, st: &mut CoordinatorState) -> usize {
        let delegate = st.delegate.clone();
        let suspended: Vec<PeerId> = st
            .sessions
            .iter()
            .filter(|(_, session)| session.state == SessionState::Suspended)
            .map(|(peer, _)| peer.clone())
            .collect();

        let mut resumed = 0;
        for peer in suspended {
            let remote_capabilities = Self::remote_capabilities(st, &peer);
            if let Some(session) = st.sessions.get_mut(&peer) {
                warn!(peer = %peer, "Session still suspended after foreground, forcing resume");
                if self.resume(session, remote_capabilities, true, delegate.as_ref()).await {
                    resumed += 1;
                }
            }
        }
        resumed
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn session_state(&self, peer: &PeerId) -> Option<SessionState> {
        self.inner.state.lock().await.sessions.get(peer).map(|s| s.state)
    }

    pub async fn snapshot(&self, peer: &PeerId) -> Option<SessionSnapshot> {
        self.inner.state.lock().await.sessions.get(peer).map(|s| s.snapshot())
    }

    pub async fn active_peers(&self) -> Vec<PeerId> {
        self.inner.state.lock().await.sessions.keys().cloned().collect()
    }

    pub async fn has_active_session(&self, peer: &PeerId) -> bool {
        self.inner.state.lock().await.sessions.contains_key(peer)
    }

    /// Last published distance, or the geodesic distance while in fallback
    pub async fn get_distance(&self, peer: &PeerId) -> Option<f32> {
        let st = self.inner.state.lock().await;
        let session = st.sessions.get(peer)?;

        if let Some(published) = session.throttle.last_published() {
            return Some(published.distance);
        }
        let local = self.inner.location.as_ref()?.current_location()?;
        session.arbiter.fallback_distance(&local)
    }

    pub async fn get_direction(&self, peer: &PeerId) -> Option<Vector3> {
        let st = self.inner.state.lock().await;
        let session = st.sessions.get(peer)?;

        match session.arbiter.mode() {
            DirectionMode::Precise => session.throttle.last_published()?.direction,
            DirectionMode::ApproximateFallback => {
                let location = self.inner.location.as_ref()?;
                let local = location.current_location()?;
                let heading = location.current_heading()?;
                session.arbiter.fallback_direction(&local, heading)
            }
            DirectionMode::Unavailable => None,
        }
    }

    pub async fn is_direction_available(&self, peer: &PeerId) -> bool {
        self.get_direction(peer).await.is_some()
    }

    pub async fn direction_mode(&self, peer: &PeerId) -> Option<DirectionMode> {
        self.inner.state.lock().await.sessions.get(peer).map(|s| s.arbiter.mode())
    }

    pub async fn direction_hints(&self, peer: &PeerId) -> Vec<DirectionHint> {
        self.inner
            .state
            .lock()
            .await
            .sessions
            .get(peer)
            .map(|s| s.convergence.hints().to_vec())
            .unwrap_or_default()
    }

    pub async fn retry_count(&self, peer: &PeerId) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .sessions
            .get(peer)
            .map(|s| s.health.retry_count())
            .unwrap_or(0)
    }

    pub async fn is_direction_permanently_failed(&self, peer: &PeerId) -> bool {
        self.inner
            .state
            .lock()
            .await
            .sessions
            .get(peer)
            .map(|s| s.arbiter.is_permanently_failed())
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------------
    // Internals (called with the state lock held)
    // ---------------------------------------------------------------------

    fn remote_capabilities(st: &CoordinatorState, peer: &PeerId) -> CapabilitySet {
        st.peer_capabilities
            .get(peer)
            .copied()
            .unwrap_or_else(CapabilitySet::unknown_peer)
    }

    fn announce_state(&self, peer: &PeerId, state: SessionState, delegate: Option<&Delegate>) {
        self.inner.events.publish(CoordinatorEvent::StateChanged {
            peer: peer.clone(),
            state,
            timestamp: now_ts(),
        });
        if let Some(delegate) = delegate {
            delegate.session_state_changed(peer, state);
        }
    }

    fn transition(&self, session: &mut PeerSession, to: SessionState, delegate: Option<&Delegate>) -> bool {
        let from = session.state;
        if !session.transition(to) {
            if from != to {
                warn!(peer = %session.peer, %from, %to, "Ignoring invalid state transition");
            }
            return false;
        }
        debug!(peer = %session.peer, %from, %to, "Session state changed");
        self.announce_state(&session.peer, to, delegate);
        true
    }

    /// Remove a session, cancelling its timers before releasing its token
    async fn teardown(&self, st: &mut CoordinatorState, peer: &PeerId, error: Option<&RangingError>) -> bool {
        let mut session = match st.sessions.remove(peer) {
            Some(session) => session,
            None => return false,
        };

        session.timers.cancel_all();
        self.inner.provider.stop(peer).await;

        if session.arbiter.deactivate() {
            if let Some(location) = &self.inner.location {
                location.stop_sharing(peer);
            }
        }

        let delegate = st.delegate.clone();
        self.transition(&mut session, SessionState::Disconnected, delegate.as_ref());
        if let (Some(delegate), Some(error)) = (delegate.as_ref(), error) {
            delegate.session_failed(peer, error);
        }

        info!(peer = %peer, session_id = %session.id, "Session torn down");
        true
    }

    fn on_measurement(&self, session: &mut PeerSession, measurement: Measurement, delegate: Option<&Delegate>) {
        if !session.state.is_active() {
            debug!(peer = %session.peer, state = %session.state, "Ignoring measurement outside an active session");
            return;
        }

        if session.state == SessionState::Running {
            self.transition(session, SessionState::Ranging, delegate);
            session.health.reset();
            session.timers.cancel_health();

            if !session.established_announced {
                session.established_announced = true;
                info!(peer = %session.peer, distance = measurement.distance, "Ranging established");
                self.inner.events.publish(CoordinatorEvent::RangingEstablished {
                    peer: session.peer.clone(),
                    timestamp: now_ts(),
                });
            }
        }
        session.has_measured = true;

        let action = session.arbiter.on_measurement(measurement.direction.is_some());
        if action.cancel_timer {
            session.timers.cancel_direction();
        }
        if action.stop_sharing {
            if let Some(location) = &self.inner.location {
                location.stop_sharing(&session.peer);
            }
        }
        if action.mode_changed {
            info!(peer = %session.peer, "Hardware direction available");
            self.publish_mode(session);
        }

        let decision = session.throttle.evaluate(&measurement, Instant::now());
        if decision.publish {
            self.inner.events.publish(CoordinatorEvent::MeasurementPublished {
                peer: session.peer.clone(),
                distance: measurement.distance,
                direction: measurement.direction,
                timestamp: now_ts(),
            });
        } else if decision.log_drop {
            debug!(
                peer = %session.peer,
                distance = measurement.distance,
                has_direction = measurement.direction.is_some(),
                "Dropping insignificant measurement"
            );
        }

        session.last_measurement = Some(measurement);
    }

    /// Clears hints on convergence; mode changes are left to the measurement path
    fn on_convergence(&self, session: &mut PeerSession, status: &ConvergenceStatus) {
        let had_hints = !session.convergence.hints().is_empty();
        let hints = match session.convergence.process(status, Instant::now()) {
            None => return,
            Some(ConvergenceOutcome::Converged) => {
                if !had_hints {
                    return;
                }
                debug!(peer = %session.peer, "Orientation assist converged");
                Vec::new()
            }
            Some(ConvergenceOutcome::NeedsHelp(hints)) => hints,
        };

        self.inner.events.publish(CoordinatorEvent::DirectionHintsChanged {
            peer: session.peer.clone(),
            hints,
            timestamp: now_ts(),
        });
    }

    async fn disable_orientation_assist(&self, session: &mut PeerSession, reason: String) {
        if session.orientation_assist_disabled {
            return;
        }
        session.orientation_assist_disabled = true;
        warn!(peer = %session.peer, %reason, "Orientation assist failed, continuing without it");

        self.inner.events.publish(CoordinatorEvent::OrientationAssistDisabled {
            peer: session.peer.clone(),
            reason,
            timestamp: now_ts(),
        });

        let config = match session.config {
            Some(config) if config.orientation_assist => SessionConfig {
                orientation_assist: false,
                ..config
            },
            _ => return,
        };
        session.config = Some(config);

        if session.state.is_active() {
            if let Some(remote) = &session.remote_token {
                if let Err(e) = self.inner.provider.run(&session.peer, &config, remote).await {
                    warn!(peer = %session.peer, "Failed to re-run without orientation assist: {}", e);
                }
            }
        }
    }

    /// Leave suspension, re-issuing the last configuration when the session had started.
    /// A start that arrived while suspended runs now.
    async fn resume(
        &self,
        session: &mut PeerSession,
        remote_capabilities: CapabilitySet,
        forced: bool,
        delegate: Option<&Delegate>,
    ) -> bool {
        if session.state != SessionState::Suspended {
            return false;
        }

        let previous = session.resume_state.take().unwrap_or(SessionState::Running);
        if previous.is_prepared() {
            if !self.transition(session, previous, delegate) {
                return false;
            }
            let remote = match session.remote_token.take() {
                Some(remote) => remote,
                None => return true,
            };
            if let Err(e) = self.begin_ranging(session, remote_capabilities, remote, delegate).await {
                error!(peer = %session.peer, "Deferred start failed on resume: {}", e);
                return true;
            }
            info!(peer = %session.peer, forced, "Deferred start ran after suspension");
            self.inner.events.publish(CoordinatorEvent::SessionResumed {
                peer: session.peer.clone(),
                forced,
                timestamp: now_ts(),
            });
            return true;
        }

        let (config, remote) = match (session.config, session.remote_token.clone()) {
            (Some(config), Some(remote)) => (config, remote),
            _ => {
                warn!(peer = %session.peer, "Cannot resume a session that never started");
                return false;
            }
        };

        if let Err(e) = self.inner.provider.run(&session.peer, &config, &remote).await {
            error!(peer = %session.peer, "Failed to re-issue configuration on resume: {}", e);
            session.resume_state = Some(previous);
            return false;
        }

        self.transition(session, SessionState::Running, delegate);
        info!(peer = %session.peer, forced, "Session resumed");
        self.inner.events.publish(CoordinatorEvent::SessionResumed {
            peer: session.peer.clone(),
            forced,
            timestamp: now_ts(),
        });
        true
    }

    fn activate_fallback(&self, session: &mut PeerSession, cause: FallbackCause) {
        match cause {
            FallbackCause::Capability => {
                info!(peer = %session.peer, "Pairing cannot produce direction, using location fallback")
            }
            FallbackCause::DirectionTimeout => {
                warn!(peer = %session.peer, "No direction from hardware, falling back for this session")
            }
        }

        match &self.inner.location {
            Some(location) => location.start_sharing(&session.peer),
            None => RangingError::LocationUnavailable.log_with_context(
                &ErrorContext::new()
                    .with_peer_id(session.peer.clone())
                    .with_session_id(session.id)
                    .with_info("no location provider for fallback".to_string()),
            ),
        }
        self.publish_mode(session);
    }

    fn publish_mode(&self, session: &PeerSession) {
        self.inner.events.publish(CoordinatorEvent::DirectionModeChanged {
            peer: session.peer.clone(),
            mode: session.arbiter.mode(),
            cause: session.arbiter.fallback_cause(),
            timestamp: now_ts(),
        });
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    fn spawn_health_timer(&self, peer: PeerId, session_id: Uuid) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let grace = self.inner.config.health_check_grace;
        let every = self.inner.config.health_check_interval;

        tokio::spawn(async move {
            sleep(grace).await;
            loop {
                let coordinator = match Self::from_weak(&weak) {
                    Some(coordinator) => coordinator,
                    None => break,
                };
                if !coordinator.run_health_check(&peer, session_id).await {
                    break;
                }
                drop(coordinator);
                sleep(every).await;
            }
        })
    }

    /// One health check; returns whether checking should continue
    async fn run_health_check(&self, peer: &PeerId, session_id: Uuid) -> bool {
        let mut st = self.inner.state.lock().await;
        let delegate = st.delegate.clone();
        let session = match st.sessions.get_mut(peer) {
            Some(session) if session.id == session_id => session,
            _ => return false,
        };

        let stalled = session.state == SessionState::Running && !session.has_measured;
        match session.health.check(stalled, Instant::now()) {
            HealthVerdict::Healthy => true,
            HealthVerdict::Backoff { remaining } => {
                debug!(peer = %peer, ?remaining, "Stalled session inside restart backoff");
                true
            }
            HealthVerdict::Restart { attempt } => {
                warn!(peer = %peer, attempt, "No measurement received, restarting session");
                self.inner.events.publish(CoordinatorEvent::RestartRequested {
                    peer: peer.clone(),
                    attempt,
                    coordinated: delegate.is_some(),
                    timestamp: now_ts(),
                });

                match delegate {
                    Some(delegate) => {
                        // The next start_session arms a fresh health timer
                        session.timers.health.take();
                        self.coordinated_restart(session, &delegate, attempt).await;
                        false
                    }
                    None => {
                        self.local_restart(session).await;
                        true
                    }
                }
            }
            HealthVerdict::GiveUp { attempts } => {
                error!(peer = %peer, attempts, "Session never produced a measurement, giving up");
                session.timers.health.take();
                self.inner.events.publish(CoordinatorEvent::RetriesExhausted {
                    peer: peer.clone(),
                    attempts,
                    timestamp: now_ts(),
                });
                if let Some(delegate) = delegate {
                    delegate.retries_exhausted(peer, attempts);
                }
                false
            }
        }
    }

    /// Hand out a fresh token so both sides can re-synchronize
    async fn coordinated_restart(&self, session: &mut PeerSession, delegate: &Delegate, attempt: u32) {
        match self.reissue_token(session, Some(delegate)).await {
            Ok(fresh) => delegate.restart_requested(&session.peer, &fresh, attempt),
            Err(e) => error!(peer = %session.peer, "Could not create a fresh token for restart: {}", e),
        }
    }

    /// Stop the provider and go back to Preparing under a new local token.
    /// The record, its arbiter and its health state survive.
    async fn reissue_token(&self, session: &mut PeerSession, delegate: Option<&Delegate>) -> Result<DiscoveryToken> {
        let peer = session.peer.clone();
        self.inner.provider.stop(&peer).await;
        let fresh = self.inner.provider.create_session(&peer).await?;

        session.timers.cancel_direction();
        session.timers.cancel_health();
        session.local_token = fresh.clone();
        session.remote_token = None;
        session.resume_state = None;
        self.transition(session, SessionState::Preparing, delegate);
        info!(peer = %peer, session_id = %session.id, "Session restarted with a fresh token");
        Ok(fresh)
    }

    /// Re-run with the tokens we already have; less reliable than a coordinated restart
    async fn local_restart(&self, session: &mut PeerSession) {
        let peer = session.peer.clone();
        let (config, remote) = match (session.config, session.remote_token.clone()) {
            (Some(config), Some(remote)) => (config, remote),
            _ => return,
        };

        self.inner.provider.stop(&peer).await;
        if let Err(e) = self.inner.provider.run(&peer, &config, &remote).await {
            warn!(peer = %peer, "Local restart failed: {}", e);
        } else {
            info!(peer = %peer, "Local-only restart issued");
        }
    }

    fn spawn_direction_timer(&self, peer: PeerId, session_id: Uuid, timeout: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(coordinator) = Self::from_weak(&weak) {
                coordinator.on_direction_timeout(&peer, session_id).await;
            }
        })
    }

    async fn on_direction_timeout(&self, peer: &PeerId, session_id: Uuid) {
        let mut st = self.inner.state.lock().await;
        let session = match st.sessions.get_mut(peer) {
            Some(session) if session.id == session_id => session,
            _ => return,
        };

        session.timers.direction.take();
        if let StartAction::ActivateFallback(cause) = session.arbiter.on_direction_timeout() {
            self.activate_fallback(session, cause);
        }
    }
}
