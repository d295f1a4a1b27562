// Two coordinators ranging against each other over simulated hardware
// Run with `RUST_LOG=info cargo run -p ranging --example simulated_pair`
// (RANGING_LOG_FORMAT=pretty for human-readable logs, json by default)

use async_trait::async_trait;
use ranging::logging::init_from_env;
use ranging::{
    CapabilitySet, CoordinatorConfig, CoordinatorEvent, DiscoveryToken, HardwareClass, Measurement,
    PeerId, PeerMessage, ProviderEvent, RangingProvider, Result, SessionConfig, SessionCoordinator,
    Vector3,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Emits a measurement stream of a peer walking towards us
struct SimulatedProvider {
    capabilities: CapabilitySet,
    events: mpsc::Sender<(PeerId, ProviderEvent)>,
    streams: Mutex<HashMap<PeerId, JoinHandle<()>>>,
}

#[async_trait]
impl RangingProvider for SimulatedProvider {
    fn local_capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn create_session(&self, _peer: &PeerId) -> Result<DiscoveryToken> {
        Ok(DiscoveryToken::generate())
    }

    async fn run(&self, peer: &PeerId, config: &SessionConfig, _remote_token: &DiscoveryToken) -> Result<()> {
        let tx = self.events.clone();
        let peer_id = peer.clone();
        let with_direction = config.direction_enabled;

        let stream = tokio::spawn(async move {
            let mut distance = 6.0f32;
            let mut angle = 0.6f32;
            while distance > 0.3 {
                let direction = with_direction.then(|| Vector3::new(angle.sin(), 0.0, -angle.cos()));
                let event = ProviderEvent::Measurement(Measurement::new(distance, direction));
                if tx.send((peer_id.clone(), event)).await.is_err() {
                    break;
                }
                distance -= 0.04;
                angle *= 0.97;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = streams.insert(peer.clone(), stream) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self, peer: &PeerId) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stream) = streams.remove(peer) {
            stream.abort();
        }
    }
}

fn device(capabilities: CapabilitySet, config: &CoordinatorConfig) -> (SessionCoordinator, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let provider = Arc::new(SimulatedProvider {
        capabilities,
        events: tx,
        streams: Mutex::new(HashMap::new()),
    });
    let coordinator = SessionCoordinator::new(provider, None, config.clone());
    let pump = coordinator.attach_provider_events(rx);
    (coordinator, pump)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_from_env();
    let config = CoordinatorConfig::from_env()?;

    let advanced = CapabilitySet::new(HardwareClass::Advanced, true, true, true);
    let (alice, _alice_pump) = device(advanced, &config);
    let (bob, _bob_pump) = device(advanced, &config);
    let alice_id: PeerId = "alice".to_string();
    let bob_id: PeerId = "bob".to_string();

    // Capability announcement travels over the wire format
    let announcement = PeerMessage::decode(&alice.capabilities_message().encode()?)?;
    bob.handle_peer_message(&alice_id, announcement).await?;
    alice.handle_peer_message(&bob_id, bob.capabilities_message()).await?;

    let mut events = alice.subscribe();
    let observer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CoordinatorEvent::MeasurementPublished { distance, direction, .. } => {
                    info!("bob is {:.2} m away, direction {:?}", distance, direction)
                }
                other => info!(?other, "coordinator event"),
            }
        }
    });

    // Alice opens the exchange; Bob answers with his own token
    let token = alice.prepare_session(&bob_id).await?;
    alice.mark_token_sent(&bob_id).await?;
    let reply = bob
        .handle_peer_message(&alice_id, PeerMessage::DiscoveryToken { token })
        .await?;
    if let Some(reply) = reply {
        alice.handle_peer_message(&bob_id, reply).await?;
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    if let Some(snapshot) = alice.snapshot(&bob_id).await {
        info!(state = %snapshot.state, mode = %snapshot.direction_mode, "Alice's view of bob");
    }

    alice.stop_all_sessions().await;
    bob.stop_all_sessions().await;
    observer.abort();
    Ok(())
}
