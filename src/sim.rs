//! Simulation collaborators
//!
//! Deterministic stand-ins for the pose-estimation backend, the host tracking
//! subsystem and the scene, used by the demo binary and the test suite:
//! - [`ScriptedLocalizer`] replays a fixed sequence of confidences or errors
//! - [`SimTrackingProvider`] reports a fixed device pose and publishes frames
//!   pushed into it
//! - [`RecordingSceneSink`] keeps every placement it is handed

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bevy::math::{Mat3, Mat4, Quat, Vec3};
use futures_lite::future::Boxed;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::collaborators::{
    Frame, LocalizeRequest, Localizer, SceneUpdate, SceneUpdateSink, TrackingProvider,
    TrackingQuality, TrackingSample,
};
use crate::error::{LocalizationError, LocalizationResult};
use crate::registry::{MapEntry, MapHandleRegistry, MapId, MapSelection};
use crate::transform::{
    compose_anchor_placement, ComposedLocalizationResult, RawLocalizationResult, SpatialRelation,
};

/// A 640x480 grey frame with a plausible pinhole calibration
pub fn synthetic_frame(timestamp: f64) -> Frame {
    let (width, height) = (640u32, 480u32);
    Frame {
        timestamp,
        width,
        height,
        pixels: Arc::from(vec![128u8; (width * height) as usize]),
        intrinsics: Mat3::from_cols(
            Vec3::new(500.0, 0.0, 0.0),
            Vec3::new(0.0, 500.0, 0.0),
            Vec3::new(320.0, 240.0, 1.0),
        ),
        camera_to_device: Mat4::IDENTITY,
    }
}

/// Localizer that answers from a script
pub struct ScriptedLocalizer {
    script: Mutex<VecDeque<LocalizationResult<f32>>>,
    /// Replayed from the start once exhausted
    repeat: Vec<LocalizationResult<f32>>,
    position: Vec3,
    rotation: Quat,
    selection: MapSelection,
    latency: Duration,
    calls: AtomicU64,
    last_request: Mutex<Option<Vec<MapId>>>,
}

impl ScriptedLocalizer {
    /// Answer with one successful pose per confidence, then fail
    pub fn new(confidences: impl IntoIterator<Item = f32>) -> Self {
        Self::from_replies(confidences.into_iter().map(Ok))
    }

    pub fn from_replies(replies: impl IntoIterator<Item = LocalizationResult<f32>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            repeat: Vec::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            selection: MapSelection::AllRegistered,
            latency: Duration::ZERO,
            calls: AtomicU64::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Loop over the script forever instead of failing when it runs out
    pub fn repeating(mut self) -> Self {
        self.repeat = self.script.get_mut().iter().cloned().collect();
        self
    }

    /// Camera pose reported in map space
    pub fn with_pose(mut self, position: Vec3, rotation: Quat) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_selection(mut self, selection: MapSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Delay every answer, to keep calls in flight
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Map ids passed on the most recent call
    pub fn last_requested_maps(&self) -> Option<Vec<MapId>> {
        self.last_request.lock().clone()
    }

    fn next_reply(&self) -> LocalizationResult<f32> {
        let mut script = self.script.lock();
        if script.is_empty() && !self.repeat.is_empty() {
            script.extend(self.repeat.iter().cloned());
        }
        script
            .pop_front()
            .unwrap_or_else(|| Err(LocalizationError::Backend("script exhausted".to_string())))
    }

    fn answer(&self, request: &LocalizeRequest) -> LocalizationResult<RawLocalizationResult> {
        // An on-device backend can only search maps it holds a handle for
        if self.selection == MapSelection::LoadedOnly && request.handles.is_none() {
            return Err(LocalizationError::UnresolvedMapIds(request.map_ids.clone()));
        }

        let confidence = self.next_reply()?;
        let map_id = request
            .map_ids
            .first()
            .copied()
            .unwrap_or(MapId::DEFAULT_SENTINEL);
        Ok(RawLocalizationResult {
            map_id,
            position: self.position,
            rotation: self.rotation,
            confidence,
            timestamp: request.frame.timestamp,
        })
    }
}

impl Localizer for ScriptedLocalizer {
    fn localize(&self, request: LocalizeRequest) -> Boxed<LocalizationResult<RawLocalizationResult>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock() = Some(request.map_ids.clone());

        let reply = self.answer(&request);
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            reply
        })
    }

    fn required_map_ids(&self, registry: &MapHandleRegistry) -> Vec<MapId> {
        self.selection.select(registry)
    }
}

/// Tracking provider with a settable device pose and a frame feed
pub struct SimTrackingProvider {
    device_to_world: Mutex<Mat4>,
    quality: TrackingQuality,
    frames: watch::Sender<Option<Frame>>,
    start_error: Mutex<Option<LocalizationError>>,
    sample_error: Mutex<Option<LocalizationError>>,
    sessions_started: AtomicU64,
}

impl Default for SimTrackingProvider {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

impl SimTrackingProvider {
    pub fn new(device_to_world: Mat4) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            device_to_world: Mutex::new(device_to_world),
            quality: TrackingQuality::Normal,
            frames,
            start_error: Mutex::new(None),
            sample_error: Mutex::new(None),
            sessions_started: AtomicU64::new(0),
        }
    }

    /// Make every `start_session` fail with `error`
    pub fn failing_start(self, error: LocalizationError) -> Self {
        *self.start_error.lock() = Some(error);
        self
    }

    /// Fail every tracking sample with `error` until cleared with `None`
    pub fn set_sample_error(&self, error: Option<LocalizationError>) {
        *self.sample_error.lock() = error;
    }

    pub fn publish_frame(&self, frame: Frame) {
        debug!(timestamp = frame.timestamp, "publishing frame");
        self.frames.send_replace(Some(frame));
    }

    pub fn set_device_to_world(&self, device_to_world: Mat4) {
        *self.device_to_world.lock() = device_to_world;
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }
}

impl TrackingProvider for SimTrackingProvider {
    fn start_session(&self) -> Boxed<LocalizationResult<()>> {
        let outcome = match self.start_error.lock().clone() {
            Some(error) => Err(error),
            None => {
                self.sessions_started.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        };
        Box::pin(async move { outcome })
    }

    fn tracking_sample(&self, timestamp: f64) -> Boxed<LocalizationResult<TrackingSample>> {
        let sample = match self.sample_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(TrackingSample {
                device_to_world: *self.device_to_world.lock(),
                quality: self.quality,
                timestamp,
            }),
        };
        Box::pin(async move { sample })
    }

    fn latest_frame(&self) -> Boxed<LocalizationResult<Frame>> {
        let frame = self
            .frames
            .borrow()
            .clone()
            .ok_or(LocalizationError::FrameNotAvailable);
        Box::pin(async move { frame })
    }

    fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frames.subscribe()
    }
}

/// Scene sink that keeps every placement instead of moving anything
#[derive(Debug, Default)]
pub struct RecordingSceneSink {
    updates: Mutex<Vec<SceneUpdate>>,
}

impl RecordingSceneSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<SceneUpdate> {
        self.updates.lock().clone()
    }
}

impl SceneUpdateSink for RecordingSceneSink {
    fn apply_pose(
        &self,
        entry: &MapEntry,
        result: &ComposedLocalizationResult,
        tracked_to_world: Mat4,
    ) -> LocalizationResult<SceneUpdate> {
        let camera_in_map = SpatialRelation::from_pose(result.position, result.rotation)?;
        let update = SceneUpdate {
            map_id: entry.map_id,
            entity: entry.scene_attachment,
            placement: compose_anchor_placement(tracked_to_world, &camera_in_map, &entry.relation),
        };
        self.updates.lock().push(update);
        Ok(update)
    }
}
