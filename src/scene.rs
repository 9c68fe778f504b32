//! Bevy scene integration
//!
//! [`ChannelSceneSink`] is handed to the session as its scene-update sink and
//! forwards anchor placements over a crossbeam channel, the same way IMU
//! orientation reaches the render loop. [`RelocalizationPlugin`] drains that
//! channel and the session event stream once per frame, moving each attached
//! entity and keeping [`LocalizationStatus`] current.

use bevy::prelude::{App, Entity, Mat4, Plugin, Query, Res, ResMut, Resource, Transform, Update};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::collaborators::{SceneUpdate, SceneUpdateSink};
use crate::error::{LocalizationError, LocalizationResult};
use crate::registry::{MapEntry, MapId};
use crate::session::SessionEvent;
use crate::transform::{compose_anchor_placement, ComposedLocalizationResult, SpatialRelation};

/// New world placement for the scene node following a map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorUpdate {
    pub map_id: MapId,
    pub entity: Entity,
    pub placement: Mat4,
    pub confidence: f32,
}

pub struct ChannelSceneSink {
    tx: Sender<AnchorUpdate>,
}

impl ChannelSceneSink {
    pub fn new() -> (Self, Receiver<AnchorUpdate>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl SceneUpdateSink for ChannelSceneSink {
    fn apply_pose(
        &self,
        entry: &MapEntry,
        result: &ComposedLocalizationResult,
        tracked_to_world: Mat4,
    ) -> LocalizationResult<SceneUpdate> {
        let camera_in_map = SpatialRelation::from_pose(result.position, result.rotation)?;
        let placement = compose_anchor_placement(tracked_to_world, &camera_in_map, &entry.relation);

        let Some(entity) = entry.scene_attachment else {
            debug!(map_id = %entry.map_id, "map has no scene node attached");
            return Ok(SceneUpdate {
                map_id: entry.map_id,
                entity: None,
                placement,
            });
        };

        self.tx
            .send(AnchorUpdate {
                map_id: entry.map_id,
                entity,
                placement,
                confidence: result.confidence,
            })
            .map_err(|_| LocalizationError::SceneUpdate("scene receiver dropped".to_string()))?;

        Ok(SceneUpdate {
            map_id: entry.map_id,
            entity: Some(entity),
            placement,
        })
    }
}

#[derive(Resource)]
pub struct AnchorUpdateChannel(pub Receiver<AnchorUpdate>);

#[derive(Resource)]
pub struct SessionEventChannel(pub Receiver<SessionEvent>);

/// Latest session status as seen by the app
#[derive(Resource, Debug, Default)]
pub struct LocalizationStatus {
    pub running: bool,
    pub last_result: Option<ComposedLocalizationResult>,
    pub last_error: Option<LocalizationError>,
    pub results_received: u64,
    pub anchors_applied: u64,
}

pub struct RelocalizationPlugin {
    anchors: Receiver<AnchorUpdate>,
    events: Receiver<SessionEvent>,
}

impl RelocalizationPlugin {
    pub fn new(anchors: Receiver<AnchorUpdate>, events: Receiver<SessionEvent>) -> Self {
        Self { anchors, events }
    }
}

impl Plugin for RelocalizationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(AnchorUpdateChannel(self.anchors.clone()))
            .insert_resource(SessionEventChannel(self.events.clone()))
            .init_resource::<LocalizationStatus>()
            .add_systems(Update, (drain_session_events, apply_anchor_updates));
    }
}

pub fn drain_session_events(
    channel: Res<SessionEventChannel>,
    mut status: ResMut<LocalizationStatus>,
) {
    for event in channel.0.try_iter() {
        match event {
            SessionEvent::Started => {
                info!("relocalization running");
                status.running = true;
            }
            SessionEvent::Stopped => {
                info!("relocalization stopped");
                status.running = false;
            }
            SessionEvent::Result(result) => {
                debug!(map_id = %result.map_id, confidence = result.confidence, "localization result");
                status.last_result = Some(result);
                status.results_received += 1;
            }
            SessionEvent::Failed(error) => {
                debug!(%error, "localization failure reported");
                status.last_error = Some(error);
            }
        }
    }
}

pub fn apply_anchor_updates(
    channel: Res<AnchorUpdateChannel>,
    mut transforms: Query<&mut Transform>,
    mut status: ResMut<LocalizationStatus>,
) {
    for update in channel.0.try_iter() {
        match transforms.get_mut(update.entity) {
            Ok(mut transform) => {
                *transform = Transform::from_matrix(update.placement);
                status.anchors_applied += 1;
            }
            Err(error) => {
                warn!(map_id = %update.map_id, %error, "anchor entity cannot be moved");
            }
        }
    }
}
