//! XREAL Relocalization Library
//!
//! Keeps virtual content anchored to previously mapped physical spaces by
//! repeatedly localizing the headset camera against registered maps and
//! re-aligning the scene when a pose estimate is trustworthy.
//!
//! - [`transform`]: map/tracking/world coordinate composition
//! - [`registry`]: map ids, backend handles and per-map placement
//! - [`gate`]: confidence-based decision to move the scene
//! - [`session`]: lifecycle, the repeating cycle and the event stream
//! - [`scene`]: Bevy plugin applying placements to entities

pub mod collaborators;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod registry;
pub mod scene;
pub mod session;
pub mod sim;
pub mod transform;

// Re-export commonly used types
pub use collaborators::{
    CameraParams, Frame, LocalizeRequest, Localizer, SceneUpdate, SceneUpdateSink,
    TrackingProvider, TrackingQuality, TrackingSample,
};
pub use config::{ConfigError, LoggingConfig, SessionConfig};
pub use error::{ErrorKind, LocalizationError, LocalizationResult, Severity};
pub use gate::{ConfidenceGate, ConfidenceTrend, GateConfig};
pub use registry::{MapEntry, MapHandle, MapHandleRegistry, MapId, MapSelection};
pub use scene::{AnchorUpdate, ChannelSceneSink, LocalizationStatus, RelocalizationPlugin};
pub use session::{
    CycleOutcome, LifecycleCommand, LocalizationSession, SessionCounters, SessionEvent,
    SessionState,
};
pub use transform::{ComposedLocalizationResult, RawLocalizationResult, SpatialRelation};
