// Application lifecycle tracking
// A return to the foreground after a background period schedules suspension recovery

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Application state for lifecycle management
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

/// Tracks foreground/background transitions
pub struct LifecycleManager {
    app_state: Arc<RwLock<AppState>>,
    backgrounded_at: Arc<RwLock<Option<Instant>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            app_state: Arc::new(RwLock::new(AppState::Foreground)),
            backgrounded_at: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_state(&self) -> AppState {
        *self.app_state.read().await
    }

    pub async fn on_background(&self) {
        info!("Application moving to background");
        *self.app_state.write().await = AppState::Background;

        let mut backgrounded_at = self.backgrounded_at.write().await;
        if backgrounded_at.is_none() {
            *backgrounded_at = Some(Instant::now());
        }
    }

    /// Returns how long the app was in the background, or `None` if it never left
    pub async fn on_foreground(&self) -> Option<Duration> {
        *self.app_state.write().await = AppState::Foreground;

        let backgrounded_at = self.backgrounded_at.write().await.take();
        match backgrounded_at {
            Some(at) => {
                let elapsed = at.elapsed();
                info!("Application returning to foreground after {:?}", elapsed);
                Some(elapsed)
            }
            None => {
                debug!("Foreground signal without a preceding background period");
                None
            }
        }
    }

    pub async fn is_background(&self) -> bool {
        *self.app_state.read().await == AppState::Background
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
