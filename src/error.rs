use thiserror::Error;

use crate::registry::MapId;

/// Errors produced by the relocalization engine and its collaborators
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocalizationError {
    /// The tracking provider refused to start a session
    #[error("Tracking session failed to start: {0}")]
    TrackingSessionFailed(String),

    /// Camera or motion permission was not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No camera frame has been observed yet
    #[error("Camera frame not available")]
    FrameNotAvailable,

    /// A tracking sample could not be produced for the requested time
    #[error("Tracking unavailable: {0}")]
    TrackingUnavailable(String),

    /// The localizer was asked to run against no maps
    #[error("No maps available for localization")]
    EmptyMapSet,

    /// Some requested maps have no backend handle
    #[error("Maps have no backend handle: {0:?}")]
    UnresolvedMapIds(Vec<MapId>),

    /// The backend reported a pose whose confidence is unusable
    #[error("Localization confidence too low: {0}")]
    LowConfidence(f32),

    /// The pose estimation backend reported a failure
    #[error("Localizer backend failed: {0}")]
    Backend(String),

    /// The backend returned a result that cannot be used
    #[error("Malformed localization result: {0}")]
    MalformedResult(String),

    /// The map is not registered
    #[error("Map not found: {0}")]
    MapNotFound(MapId),

    /// The map is registered but not loaded into the backend
    #[error("Map not loaded: {0}")]
    MapNotLoaded(MapId),

    /// The map is already registered
    #[error("Map already registered: {0}")]
    DuplicateRegistration(MapId),

    /// A spatial relation failed validation
    #[error("Invalid spatial relation: {0}")]
    InvalidRelation(String),

    /// A numeric configuration parameter is out of range
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    /// The scene-update sink could not apply a pose
    #[error("Scene update failed: {0}")]
    SceneUpdate(String),

    /// The repeating cycle task ended abnormally
    #[error("Localization cycle terminated: {0}")]
    CycleTerminated(String),
}

/// Broad category of a [`LocalizationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SessionLifecycle,
    Localization,
    MapManagement,
    Configuration,
    Scene,
}

/// How loudly the host should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl LocalizationError {
    pub fn kind(&self) -> ErrorKind {
        use LocalizationError::*;
        match self {
            TrackingSessionFailed(_) | PermissionDenied(_) | FrameNotAvailable
            | TrackingUnavailable(_) | CycleTerminated(_) => ErrorKind::SessionLifecycle,
            EmptyMapSet | UnresolvedMapIds(_) | LowConfidence(_) | Backend(_)
            | MalformedResult(_) => ErrorKind::Localization,
            MapNotFound(_) | MapNotLoaded(_) | DuplicateRegistration(_) => {
                ErrorKind::MapManagement
            }
            InvalidRelation(_) | InvalidParameter { .. } => ErrorKind::Configuration,
            SceneUpdate(_) => ErrorKind::Scene,
        }
    }

    pub fn severity(&self) -> Severity {
        use LocalizationError::*;
        match self {
            FrameNotAvailable | LowConfidence(_) => Severity::Info,
            TrackingUnavailable(_) | EmptyMapSet | UnresolvedMapIds(_) | Backend(_)
            | MapNotLoaded(_) | DuplicateRegistration(_) | SceneUpdate(_) => Severity::Warning,
            MalformedResult(_) | MapNotFound(_) | InvalidRelation(_)
            | InvalidParameter { .. } => Severity::Error,
            TrackingSessionFailed(_) | PermissionDenied(_) | CycleTerminated(_) => {
                Severity::Critical
            }
        }
    }

    /// Whether repeating the same operation later may succeed without
    /// intervention. The repeating cycle retries regardless.
    pub fn is_retryable(&self) -> bool {
        use LocalizationError::*;
        match self {
            FrameNotAvailable | TrackingUnavailable(_) | LowConfidence(_) | Backend(_)
            | SceneUpdate(_) | MapNotLoaded(_) | UnresolvedMapIds(_)
            | TrackingSessionFailed(_) => true,
            PermissionDenied(_) | EmptyMapSet | MalformedResult(_) | MapNotFound(_)
            | DuplicateRegistration(_) | InvalidRelation(_) | InvalidParameter { .. }
            | CycleTerminated(_) => false,
        }
    }

    pub(crate) fn invalid_parameter(name: &'static str, value: impl ToString) -> Self {
        LocalizationError::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

/// Result type for engine operations
pub type LocalizationResult<T> = Result<T, LocalizationError>;
