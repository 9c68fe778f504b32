//! Session driving a Bevy app through the relocalization plugin

use std::sync::Arc;

use bevy::math::{Mat4, Quat, Vec3};
use bevy::prelude::{App, Transform};
use xreal_relocalize::sim::{synthetic_frame, ScriptedLocalizer, SimTrackingProvider};
use xreal_relocalize::{
    ChannelSceneSink, LocalizationSession, LocalizationStatus, MapEntry, MapId,
    RelocalizationPlugin, SessionConfig, SpatialRelation,
};

use crate::test_utils::wait_until;

#[tokio::test(start_paused = true)]
async fn test_session_moves_anchor_entity() {
    let tracking = Arc::new(SimTrackingProvider::new(Mat4::from_translation(Vec3::new(
        0.0, 1.5, 0.0,
    ))));
    tracking.publish_frame(synthetic_frame(0.0));
    let localizer = ScriptedLocalizer::new([45.0, 46.0])
        .with_pose(Vec3::new(0.0, 0.0, 3.0), Quat::IDENTITY);
    let (sink, anchors) = ChannelSceneSink::new();
    let session = LocalizationSession::new(
        SessionConfig::default(),
        Arc::new(localizer),
        tracking.clone(),
        Arc::new(sink),
    );

    let mut app = App::new();
    let anchor = app.world_mut().spawn(Transform::default()).id();
    let node_in_map = SpatialRelation::from_pose(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY)
        .expect("Invalid relation");
    session
        .registry()
        .write()
        .register_map(
            MapEntry::new(MapId(7))
                .with_relation(node_in_map)
                .with_scene_attachment(anchor),
        )
        .expect("Register failed");
    app.add_plugins(RelocalizationPlugin::new(anchors, session.subscribe()));

    session.start().await.expect("Start failed");
    wait_until(|| session.counters().success_count >= 2).await;
    app.update();

    {
        let status = app.world().resource::<LocalizationStatus>();
        assert!(status.running);
        assert_eq!(status.results_received, 2);
        assert_eq!(status.anchors_applied, 2);
        assert_eq!(status.last_result.map(|r| r.confidence), Some(46.0));
    }

    // device (0, 1.5, 0) * inverse(camera at z = 3) * node at x = 1
    let transform = app
        .world()
        .get::<Transform>(anchor)
        .expect("Anchor lost its transform");
    assert!((transform.translation - Vec3::new(1.0, 1.5, -3.0)).length() < 1e-5);

    session.stop(false).await.expect("Stop failed");
    app.update();
    assert!(!app.world().resource::<LocalizationStatus>().running);
}
