mod common;

use common::*;
use ranging::{CoordinatorEvent, DiscoveryToken, PeerMessage, ProviderEvent, SessionState};
use std::time::Duration;
use tokio::time::advance;

#[tokio::test(start_paused = true)]
async fn test_foreground_forces_resume_of_stuck_sessions() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let mut events = coordinator.subscribe();
    let bob = peer("bob");
    let carol = peer("carol");

    start_ranging(&coordinator, &bob).await;
    start_ranging(&coordinator, &carol).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;

    coordinator.handle_app_backgrounded().await;
    advance(Duration::from_secs(3)).await;
    coordinator.handle_app_foregrounded().await;
    settle().await;

    // Still inside the recovery grace period
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Suspended));

    advance(Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));
    assert_eq!(coordinator.session_state(&carol).await, Some(SessionState::Running));
    assert_eq!(provider.run_count("bob"), 2);
    assert_eq!(provider.run_count("carol"), 1);

    let mut forced = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::SessionResumed { peer, forced: true, .. } = event {
            forced.push(peer);
        }
    }
    assert_eq!(forced, vec![bob]);
}

#[tokio::test(start_paused = true)]
async fn test_provider_resume_before_recovery_wins() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;
    coordinator.handle_app_backgrounded().await;
    coordinator.handle_app_foregrounded().await;

    coordinator.handle_provider_event(&bob, ProviderEvent::SuspensionEnded).await;
    assert_eq!(provider.run_count("bob"), 2);

    advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(provider.run_count("bob"), 2);
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));
}

#[tokio::test(start_paused = true)]
async fn test_foreground_without_background_still_recovers() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;
    coordinator.handle_app_foregrounded().await;
    settle().await;

    advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));
    assert_eq!(provider.run_count("bob"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_cancels_pending_recovery() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    start_ranging(&coordinator, &bob).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;
    coordinator.handle_app_backgrounded().await;
    coordinator.handle_app_foregrounded().await;
    coordinator.stop_all_sessions().await;

    advance(Duration::from_secs(2)).await;
    settle().await;
    assert!(coordinator.active_peers().await.is_empty());
    assert_eq!(provider.run_count("bob"), 1);
}

#[tokio::test]
async fn test_suspension_before_start_returns_to_prepared() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    coordinator.prepare_session(&bob).await.unwrap();
    coordinator.mark_token_sent(&bob).await.unwrap();
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;
    coordinator.handle_provider_event(&bob, ProviderEvent::SuspensionEnded).await;

    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::TokenReady));
    assert_eq!(provider.run_count("bob"), 0);
}

#[tokio::test]
async fn test_start_while_suspended_runs_after_resume() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let mut events = coordinator.subscribe();
    let bob = peer("bob");

    coordinator.prepare_session(&bob).await.unwrap();
    coordinator.mark_token_sent(&bob).await.unwrap();
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;

    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Suspended));
    assert_eq!(provider.run_count("bob"), 0);

    coordinator.handle_provider_event(&bob, ProviderEvent::SuspensionEnded).await;
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));
    assert_eq!(provider.run_count("bob"), 1);

    let mut resumed = false;
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::SessionResumed { forced: false, .. } = event {
            resumed = true;
        }
    }
    assert!(resumed);
}

#[tokio::test(start_paused = true)]
async fn test_forced_recovery_runs_deferred_start() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    coordinator.prepare_session(&bob).await.unwrap();
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;
    coordinator.start_session(&bob, DiscoveryToken::generate()).await.unwrap();

    assert_eq!(coordinator.recover_suspended_sessions().await, 1);
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::Running));
    assert_eq!(provider.run_count("bob"), 1);
}

#[tokio::test]
async fn test_token_message_keeps_session_suspended_while_prepared() {
    let provider = MockRangingProvider::advanced();
    let coordinator = coordinator(provider.clone());
    let bob = peer("bob");

    let local = coordinator.prepare_session(&bob).await.unwrap();
    coordinator.mark_token_sent(&bob).await.unwrap();
    let session_id = coordinator.snapshot(&bob).await.unwrap().session_id;
    coordinator.handle_provider_event(&bob, ProviderEvent::Suspended).await;

    let reply = coordinator
        .handle_peer_message(&bob, PeerMessage::DiscoveryToken { token: DiscoveryToken::generate() })
        .await
        .unwrap();
    assert!(reply.is_none());
    assert_eq!(provider.create_count("bob"), 1);
    assert_eq!(provider.stop_count("bob"), 0);

    let snapshot = coordinator.snapshot(&bob).await.unwrap();
    assert_eq!(snapshot.session_id, session_id);
    assert_eq!(snapshot.state, SessionState::Suspended);

    // A restart request before start hands back the pending token
    let reply = coordinator
        .handle_peer_message(&bob, PeerMessage::RestartRequest { attempt: 1 })
        .await
        .unwrap();
    assert_eq!(reply, Some(PeerMessage::DiscoveryToken { token: local }));

    // The peer's restart superseded the deferred token
    coordinator.handle_provider_event(&bob, ProviderEvent::SuspensionEnded).await;
    assert_eq!(coordinator.session_state(&bob).await, Some(SessionState::TokenReady));
    assert_eq!(provider.run_count("bob"), 0);
}
