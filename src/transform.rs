//! Rigid transform composition between map, tracking and world space.
//!
//! Everything here is pure. Relations are validated when they are built, so
//! the matrix helpers never fail.

use bevy::math::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::collaborators::TrackingSample;
use crate::error::{LocalizationError, LocalizationResult};
use crate::registry::MapId;

/// Maximum deviation of a quaternion's norm from 1 accepted by [`SpatialRelation::new`]
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Position, rotation and scale of one frame expressed in another
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpatialRelation {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
}

impl Default for SpatialRelation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SpatialRelation {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Build a validated relation.
    ///
    /// Rejects non-finite components, scale components that are not strictly
    /// positive and rotations whose norm is not 1 within [`UNIT_NORM_TOLERANCE`].
    /// Accepted rotations are renormalized.
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> LocalizationResult<Self> {
        if !position.is_finite() {
            return Err(LocalizationError::InvalidRelation(format!(
                "position is not finite: {position}"
            )));
        }
        if !scale.is_finite() || scale.min_element() <= 0.0 {
            return Err(LocalizationError::InvalidRelation(format!(
                "scale must be positive: {scale}"
            )));
        }
        if !rotation.is_finite() || (rotation.length() - 1.0).abs() > UNIT_NORM_TOLERANCE {
            return Err(LocalizationError::InvalidRelation(format!(
                "rotation is not a unit quaternion: {rotation}"
            )));
        }

        Ok(Self {
            position,
            rotation: rotation.normalize(),
            scale,
        })
    }

    /// Relation with unit scale, as produced by pose estimates
    pub fn from_pose(position: Vec3, rotation: Quat) -> LocalizationResult<Self> {
        Self::new(position, rotation, Vec3::ONE)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Translation ∘ rotation ∘ scale: points are scaled first, then rotated,
    /// then translated.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_quat(self.rotation)
            * Mat4::from_scale(self.scale)
    }

    /// Exact inverse of [`matrix`](Self::matrix), composed from the inverted
    /// parts in reverse order rather than by general matrix inversion.
    pub fn inverse_matrix(&self) -> Mat4 {
        Mat4::from_scale(self.scale.recip())
            * Mat4::from_quat(self.rotation.conjugate())
            * Mat4::from_translation(-self.position)
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        project(self.matrix(), point)
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        project(self.inverse_matrix(), point)
    }
}

/// Apply a homogeneous transform and divide by `w`.
fn project(matrix: Mat4, point: Vec3) -> Vec3 {
    let v = matrix * point.extend(1.0);
    if v.w == 0.0 {
        v.truncate()
    } else {
        v.truncate() / v.w
    }
}

/// Pose estimate returned by a localizer, expressed in map space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawLocalizationResult {
    pub map_id: MapId,
    pub position: Vec3,
    pub rotation: Quat,
    pub confidence: f32,
    pub timestamp: f64,
}

impl RawLocalizationResult {
    /// Reject results that cannot be composed, returning a copy with a
    /// normalized rotation.
    pub fn validate(&self) -> LocalizationResult<Self> {
        if !self.confidence.is_finite() {
            return Err(LocalizationError::MalformedResult(format!(
                "confidence is not finite: {}",
                self.confidence
            )));
        }
        if !self.position.is_finite() {
            return Err(LocalizationError::MalformedResult(format!(
                "position is not finite: {}",
                self.position
            )));
        }
        if !self.rotation.is_finite() || self.rotation.length_squared() <= f32::EPSILON {
            return Err(LocalizationError::MalformedResult(format!(
                "rotation is degenerate: {}",
                self.rotation
            )));
        }

        Ok(Self {
            rotation: self.rotation.normalize(),
            ..*self
        })
    }

    /// The estimate as a unit-scale relation from map space
    pub fn pose(&self) -> LocalizationResult<SpatialRelation> {
        let checked = self.validate()?;
        SpatialRelation::from_pose(checked.position, checked.rotation)
    }
}

/// Pose estimate placed in world space; the unit published to the host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComposedLocalizationResult {
    pub map_id: MapId,
    pub position: Vec3,
    pub rotation: Quat,
    pub confidence: f32,
    pub timestamp: f64,
    pub camera_to_world: Mat4,
}

/// Publication path: attach the camera's world transform to a raw estimate.
pub fn compose_result(
    sample: &TrackingSample,
    camera_to_device: Mat4,
    raw: &RawLocalizationResult,
) -> ComposedLocalizationResult {
    ComposedLocalizationResult {
        map_id: raw.map_id,
        position: raw.position,
        rotation: raw.rotation,
        confidence: raw.confidence,
        timestamp: raw.timestamp,
        camera_to_world: sample.device_to_world * camera_to_device,
    }
}

/// Re-anchoring path: world placement of a scene node attached to a map.
///
/// `tracked_to_world` is the tracked camera transform at capture time,
/// `camera_in_map` the estimated camera pose in map space and
/// `node_in_map` where the node sits inside the map.
pub fn compose_anchor_placement(
    tracked_to_world: Mat4,
    camera_in_map: &SpatialRelation,
    node_in_map: &SpatialRelation,
) -> Mat4 {
    tracked_to_world * camera_in_map.inverse_matrix() * node_in_map.matrix()
}
