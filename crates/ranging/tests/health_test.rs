mod common;

use common::*;
use ranging::{CoordinatorEvent, DiscoveryToken, Measurement, PeerMessage, ProviderEvent, SessionState};
use std::time::Duration;
use tokio::time::advance;

async fn advance_secs(secs: u64) {
    settle().await;
    advance(Duration::from_secs(secs)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_local_restart_backoff_and_give_up() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let mut events = coordinator.subscribe();
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    assert_eq!(provider.run_count("bob"), 1);

    // Grace period
    advance_secs(9).await;
    assert_eq!(provider.run_count("bob"), 1);

    // t=10: first restart
    advance_secs(1).await;
    assert_eq!(provider.run_count("bob"), 2);
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 1);

    // t=15: 5s elapsed, floor 4s
    advance_secs(5).await;
    assert_eq!(provider.run_count("bob"), 3);

    // t=20: 5s elapsed, floor 8s
    advance_secs(5).await;
    assert_eq!(provider.run_count("bob"), 3);

    // t=25: 10s elapsed
    advance_secs(5).await;
    assert_eq!(provider.run_count("bob"), 4);
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 3);

    // t=30: out of retries
    advance_secs(5).await;
    let snapshot = coordinator.snapshot(&bob).await.unwrap();
    assert!(snapshot.retries_exhausted);
    assert_eq!(provider.run_count("bob"), 4);

    // No further restarts once exhausted
    advance_secs(60).await;
    assert_eq!(provider.run_count("bob"), 4);
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));

    let mut restarts = 0;
    let mut exhausted = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            CoordinatorEvent::RestartRequested { coordinated, .. } => {
                assert!(!coordinated);
                restarts += 1;
            }
            CoordinatorEvent::RetriesExhausted { attempts, .. } => {
                assert_eq!(attempts, 3);
                exhausted += 1;
            }
            _ => {}
        }
    }
    assert_eq!(restarts, 3);
    assert_eq!(exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_coordinated_restart_hands_out_fresh_token() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let delegate = RecordingDelegate::new();
    coordinator.set_delegate(delegate.clone()).await;
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    let original = coordinator.snapshot(&bob).await.unwrap().session_id;

    advance_secs(10).await;
    assert_eq!(delegate.restart_attempts(), vec![1]);
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Preparing));
    assert_eq!(provider.create_count("bob"), 2);
    assert_eq!(provider.stop_count("bob"), 1);

    // Same session record, retry state kept
    let snapshot = coordinator.snapshot(&bob).await.unwrap();
    assert_eq!(snapshot.session_id, original);
    assert_eq!(snapshot.retry_count, 1);

    // Prepare hands back the fresh token rather than creating another
    let fresh = delegate.restarts.lock().unwrap()[0].1.clone();
    assert_eq!(coordinator.prepare_session(&bob).await.unwrap(), fresh);

    // The peer answers; a new grace period starts
    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();
    advance_secs(10).await;
    assert_eq!(delegate.restart_attempts(), vec![1, 2]);

    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();
    advance_secs(10).await;
    assert_eq!(delegate.restart_attempts(), vec![1, 2, 3]);

    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();
    advance_secs(10).await;
    assert_eq!(delegate.restart_attempts(), vec![1, 2, 3]);
    assert_eq!(delegate.exhausted.lock().unwrap().as_slice(), &[(bob.clone(), 3)]);
}

#[tokio::test(start_paused = true)]
async fn test_peer_restart_request_keeps_retry_state() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let delegate = RecordingDelegate::new();
    coordinator.set_delegate(delegate.clone()).await;
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    let original = coordinator.snapshot(&bob).await.unwrap().session_id;
    advance_secs(10).await;
    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 1);

    let reply = coordinator
        .handle_peer_message(&bob, PeerMessage::RestartRequest { attempt: 1 })
        .await
        .unwrap();
    assert!(matches!(reply, Some(PeerMessage::DiscoveryToken { .. })));
    assert_eq!(provider.create_count("bob"), 3);
    assert_eq!(provider.stop_count("bob"), 2);

    let snapshot = coordinator.snapshot(&bob).await.unwrap();
    assert_eq!(snapshot.session_id, original);
    assert_eq!(snapshot.state, SessionState::TokenReady);
    assert_eq!(snapshot.retry_count, 1);

    // The retry sequence continues rather than starting over
    coordinator
        .handle_peer_message(&bob, PeerMessage::DiscoveryToken { token: DiscoveryToken::generate() })
        .await
        .unwrap();
    advance_secs(10).await;
    assert_eq!(delegate.restart_attempts(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_measurement_resets_health() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    advance_secs(10).await;
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 1);

    coordinator
        .handle_provider_event(&bob, ProviderEvent::Measurement(Measurement::new(1.0, None)))
        .await;
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Ranging));
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 0);

    // Health checking stops once ranging is established
    let runs = provider.run_count("bob");
    advance_secs(60).await;
    assert_eq!(provider.run_count("bob"), runs);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timer_does_not_touch_new_session() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    advance_secs(5).await;
    coordinator.stop_session(&bob).await;
    start_ranging(&coordinator, &bob).await;
    let runs = provider.run_count("bob");

    // t=10: the first session's check would have fired here
    advance_secs(5).await;
    assert_eq!(provider.run_count("bob"), runs);
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 0);

    // t=15: the new session's first check
    advance_secs(5).await;
    assert_eq!(provider.run_count("bob"), runs + 1);
}

#[tokio::test(start_paused = true)]
async fn test_suspended_session_is_not_restarted() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;

    advance_secs(30).await;
    assert_eq!(provider.run_count("bob"), 1);
    assert_eq!(coordinator.snapshot(&bob).await.unwrap().retry_count, 0);
}
