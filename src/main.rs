use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bevy::math::{Mat4, Quat, Vec3};
use bevy::prelude::{App, Transform};
use tracing::info;

use xreal_relocalize::logging::init_logging;
use xreal_relocalize::sim::{synthetic_frame, ScriptedLocalizer, SimTrackingProvider};
use xreal_relocalize::{
    ChannelSceneSink, LocalizationSession, LocalizationStatus, MapEntry, MapId,
    RelocalizationPlugin, SessionConfig, SpatialRelation,
};

const DEMO_TICKS: u32 = 30;
const TICK: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SessionConfig::default_path);
    let config = SessionConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    init_logging(&config.logging);
    info!(path = %path.display(), "configuration loaded");

    let tracking = Arc::new(SimTrackingProvider::new(Mat4::from_translation(Vec3::new(
        0.0, 1.6, 0.0,
    ))));
    tracking.publish_frame(synthetic_frame(0.0));

    let localizer = ScriptedLocalizer::new([50.0, 48.0, 10.0, 52.0, 55.0])
        .repeating()
        .with_pose(Vec3::new(0.5, 0.0, -2.0), Quat::from_rotation_y(0.3))
        .with_latency(Duration::from_millis(30));

    let (sink, anchors) = ChannelSceneSink::new();
    let session = LocalizationSession::new(
        config,
        Arc::new(localizer),
        tracking.clone(),
        Arc::new(sink),
    );

    let mut app = App::new();
    let anchor = app.world_mut().spawn(Transform::default()).id();
    let table_in_map = SpatialRelation::from_pose(Vec3::new(1.0, 0.0, -1.0), Quat::IDENTITY)?;
    session.registry().write().register_map(
        MapEntry::new(MapId(1))
            .with_relation(table_in_map)
            .with_scene_attachment(anchor),
    )?;
    app.add_plugins(RelocalizationPlugin::new(anchors, session.subscribe()));

    session.start().await.context("Failed to start session")?;

    let mut ticker = tokio::time::interval(TICK);
    for tick in 1..=DEMO_TICKS {
        ticker.tick().await;
        tracking.publish_frame(synthetic_frame(f64::from(tick) * TICK.as_secs_f64()));
        app.update();
    }

    session.stop(false).await.context("Failed to stop session")?;
    app.update();

    let counters = session.counters();
    let status = app.world().resource::<LocalizationStatus>();
    info!(
        attempts = counters.attempt_count,
        successes = counters.success_count,
        skipped = counters.alignment_skipped_count,
        anchors_applied = status.anchors_applied,
        "session finished"
    );

    if let Some(result) = session.last_result() {
        info!(result = %serde_json::to_string(&result)?, "last result");
    }
    if let Some(transform) = app.world().get::<Transform>(anchor) {
        info!(translation = ?transform.translation, "anchor placement");
    }

    Ok(())
}
