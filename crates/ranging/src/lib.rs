pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod capability;
pub mod throttle;
pub mod convergence;
pub mod fallback;
pub mod health;
pub mod handshake;
pub mod provider;
pub mod events;
pub mod message;
pub mod session;
pub mod lifecycle;
pub mod coordinator;

pub use types::*;
pub use error::{RangingError, Result, ErrorContext, ErrorCategory};
pub use config::CoordinatorConfig;
pub use capability::{CapabilitySet, HardwareClass, Compatibility, SessionPlan, is_compatible, plan_session};
pub use convergence::{ConvergenceReason, ConvergenceStatus, DirectionHint};
pub use fallback::{FallbackCause, GeoPoint};
pub use handshake::{HandshakeArbiter, InboundVerdict, CollisionResolution};
pub use provider::{RangingProvider, LocationProvider, SessionDelegate, ProviderEvent, InvalidationReason};
pub use events::{CoordinatorEvent, EventBus};
pub use message::PeerMessage;
pub use session::SessionSnapshot;
pub use lifecycle::{LifecycleManager, AppState};
pub use coordinator::SessionCoordinator;
