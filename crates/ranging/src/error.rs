use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::SessionState;

#[derive(Error, Debug)]
pub enum RangingError {
    #[error("Ranging is not supported on this device")]
    RangingUnsupported,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session not prepared for peer {peer} (state {state})")]
    SessionNotPrepared { peer: String, state: SessionState },

    #[error("Invalid discovery token: {0}")]
    InvalidToken(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Location unavailable")]
    LocationUnavailable,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for RangingError {
    fn from(err: serde_json::Error) -> Self {
        RangingError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RangingError>;

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub peer_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_id(mut self, peer_id: String) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }
}

impl RangingError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            category = %self.category(),
            peer_id = ?context.peer_id,
            session_id = ?context.session_id,
            additional_info = ?context.additional_info,
            timestamp = %chrono::Utc::now(),
            "Ranging session error occurred"
        );
    }

    /// Faults that tear the whole session down rather than degrading it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RangingError::SessionInvalidated(_)
                | RangingError::PermissionDenied(_)
                | RangingError::RangingUnsupported
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RangingError::RangingUnsupported => {
                "This device cannot measure distance to nearby devices.".to_string()
            }
            RangingError::SessionNotFound(peer) => {
                format!("No ranging session with '{}'. Reconnect to start one.", peer)
            }
            RangingError::SessionNotPrepared { peer, .. } => {
                format!("Ranging with '{}' is not ready yet. Please try again.", peer)
            }
            RangingError::InvalidToken(_) => {
                "The nearby device sent an invalid ranging token. Please reconnect.".to_string()
            }
            RangingError::ProviderError(details) => {
                format!("Ranging failed: {}. Please try again.", details)
            }
            RangingError::SessionInvalidated(reason) => {
                format!("Ranging stopped: {}. Reconnect to try again.", reason)
            }
            RangingError::PermissionDenied(permission) => {
                format!(
                    "Permission denied: {}. Please open Settings and allow access.",
                    permission
                )
            }
            RangingError::LocationUnavailable => {
                "Location is unavailable, so approximate direction cannot be shown.".to_string()
            }
            RangingError::SerializationError(details) => {
                format!("Data processing error: {}. Please try again.", details)
            }
            RangingError::Configuration(details) => {
                format!("Invalid configuration: {}.", details)
            }
            RangingError::Other(err) => {
                format!("An internal error occurred: {}. Please try again.", err)
            }
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            RangingError::RangingUnsupported => ErrorCategory::Capability,
            RangingError::SessionNotFound(_) => ErrorCategory::Session,
            RangingError::SessionNotPrepared { .. } => ErrorCategory::Session,
            RangingError::InvalidToken(_) => ErrorCategory::Validation,
            RangingError::ProviderError(_) => ErrorCategory::Provider,
            RangingError::SessionInvalidated(_) => ErrorCategory::Provider,
            RangingError::PermissionDenied(_) => ErrorCategory::Permission,
            RangingError::LocationUnavailable => ErrorCategory::Capability,
            RangingError::SerializationError(_) => ErrorCategory::Validation,
            RangingError::Configuration(_) => ErrorCategory::Configuration,
            RangingError::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capability,
    Session,
    Provider,
    Permission,
    Validation,
    Configuration,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Capability => write!(f, "capability"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Provider => write!(f, "provider"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
