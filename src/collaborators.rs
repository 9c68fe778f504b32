//! Contracts of the components the session engine drives but does not own:
//! the pose-estimation backend, the host's AR tracking subsystem and the
//! scene that receives placements.

use std::sync::Arc;

use bevy::ecs::entity::Entity;
use bevy::math::{Mat3, Mat4};
use futures_lite::future::Boxed;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::LocalizationResult;
use crate::registry::{MapEntry, MapHandle, MapHandleRegistry, MapId};
use crate::transform::{ComposedLocalizationResult, RawLocalizationResult};

/// A camera image with the calibration valid at capture time
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture time in seconds on the tracking clock
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
    /// Pinhole intrinsics, column-major
    pub intrinsics: Mat3,
    /// Camera pose in device space
    pub camera_to_device: Mat4,
}

impl Frame {
    pub fn camera_params(&self) -> CameraParams {
        CameraParams::from_intrinsics(self.intrinsics)
    }
}

/// Focal lengths and principal point in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub fx: f32,
    pub fy: f32,
    pub ox: f32,
    pub oy: f32,
}

impl CameraParams {
    pub fn from_intrinsics(k: Mat3) -> Self {
        // K = [fx 0 ox; 0 fy oy; 0 0 1], stored by columns
        Self {
            fx: k.x_axis.x,
            fy: k.y_axis.y,
            ox: k.z_axis.x,
            oy: k.z_axis.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingQuality {
    #[default]
    NotAvailable,
    Limited,
    Normal,
}

/// Device pose reported by the host tracking subsystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSample {
    pub device_to_world: Mat4,
    pub quality: TrackingQuality,
    pub timestamp: f64,
}

/// Everything a localizer needs for one attempt
#[derive(Debug, Clone)]
pub struct LocalizeRequest {
    pub map_ids: Vec<MapId>,
    /// Backend handles for `map_ids`, when every id has one
    pub handles: Option<Vec<MapHandle>>,
    pub frame: Frame,
    pub camera: CameraParams,
}

/// Visual pose estimation, on-device or remote
pub trait Localizer: Send + Sync {
    fn localize(&self, request: LocalizeRequest) -> Boxed<LocalizationResult<RawLocalizationResult>>;

    /// Maps to search on the next attempt. Backends that can only search
    /// maps held in memory override this to return the loaded subset.
    fn required_map_ids(&self, registry: &MapHandleRegistry) -> Vec<MapId> {
        registry.registered_ids()
    }
}

/// Camera frames and device tracking from the host AR subsystem
pub trait TrackingProvider: Send + Sync {
    /// Acquire the tracking session; failures are fatal to `start`
    fn start_session(&self) -> Boxed<LocalizationResult<()>>;

    fn tracking_sample(&self, timestamp: f64) -> Boxed<LocalizationResult<TrackingSample>>;

    fn latest_frame(&self) -> Boxed<LocalizationResult<Frame>>;

    /// Push stream of frames; the receiver always holds the newest one
    fn frames(&self) -> watch::Receiver<Option<Frame>>;
}

/// Record of a placement handed to the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneUpdate {
    pub map_id: MapId,
    pub entity: Option<Entity>,
    pub placement: Mat4,
}

/// Receives poses that passed the alignment gate
pub trait SceneUpdateSink: Send + Sync {
    /// `tracked_to_world` is the tracked device transform composed with the
    /// current frame's camera extrinsics.
    fn apply_pose(
        &self,
        entry: &MapEntry,
        result: &ComposedLocalizationResult,
        tracked_to_world: Mat4,
    ) -> LocalizationResult<SceneUpdate>;
}
