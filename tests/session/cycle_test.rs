//! Cycle tests: gating, retry pacing, failure reporting and cancellation.

use std::sync::Arc;
use std::time::Duration;

use bevy::ecs::entity::Entity;
use bevy::math::{Mat4, Quat, Vec3};
use futures_lite::future::Boxed;
use tokio::time::Instant;
use xreal_relocalize::sim::{
    synthetic_frame, RecordingSceneSink, ScriptedLocalizer, SimTrackingProvider,
};
use xreal_relocalize::{
    ChannelSceneSink, ConfidenceTrend, CycleOutcome, GateConfig, LocalizationError,
    LocalizationResult, LocalizationSession, LocalizeRequest, Localizer, MapEntry, MapId,
    RawLocalizationResult, SessionConfig, SessionEvent, SessionState,
};

use crate::test_utils::{
    constants, create_bare_harness, create_harness, drain_events, result_confidences, wait_until,
};

/// Always claims a match against a map nobody registered
struct StrayLocalizer;

impl Localizer for StrayLocalizer {
    fn localize(&self, request: LocalizeRequest) -> Boxed<LocalizationResult<RawLocalizationResult>> {
        let timestamp = request.frame.timestamp;
        Box::pin(async move {
            Ok(RawLocalizationResult {
                map_id: MapId(42),
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                confidence: 60.0,
                timestamp,
            })
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_gate_decisions_end_to_end() {
    let h = create_harness(ScriptedLocalizer::new([50.0, 48.0, 10.0, 52.0]));

    h.session.start().await.expect("Start failed");
    wait_until(|| h.session.counters().success_count >= 4).await;
    h.session.stop(false).await.expect("Stop failed");

    let counters = h.session.counters();
    assert_eq!(counters.success_count, 4);
    assert_eq!(counters.alignment_skipped_count, 1);
    assert!(counters.attempt_count >= counters.success_count);

    // 10 was published but held the scene still
    assert_eq!(h.scene.updates().len(), 3);
    assert_eq!(h.session.confidence_history(), vec![52.0, 10.0, 48.0, 50.0]);

    let events = drain_events(&h.events);
    assert_eq!(events.first(), Some(&SessionEvent::Started));
    assert_eq!(events.last(), Some(&SessionEvent::Stopped));
    assert_eq!(result_confidences(&events), vec![50.0, 48.0, 10.0, 52.0]);
}

#[tokio::test(start_paused = true)]
async fn test_cold_retry_interval_until_first_success() {
    let h = create_harness(ScriptedLocalizer::from_replies(Vec::new()));

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_millis(350)).await;

    // Attempts at 0, 100, 200 and 300 ms
    assert_eq!(h.session.counters().attempt_count, 4);
    assert_eq!(h.session.counters().success_count, 0);
    h.session.stop(true).await.expect("Stop failed");

    let failures = drain_events(&h.events)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::Failed(LocalizationError::Backend(_))))
        .count();
    assert_eq!(failures, 4);
}

#[tokio::test(start_paused = true)]
async fn test_steady_retry_interval_after_success() {
    let h = create_harness(ScriptedLocalizer::new([40.0]).repeating());

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_millis(1_250)).await;

    // Attempts at 0, 500 and 1000 ms
    assert_eq!(h.session.counters().attempt_count, 3);
    h.session.stop(true).await.expect("Stop failed");
}

#[tokio::test(start_paused = true)]
async fn test_configured_intervals_are_used() {
    let config = SessionConfig::from_toml_str("cold_retry_interval_ms = 250\n")
        .expect("Config parse failed");
    let h = create_bare_harness(
        config,
        ScriptedLocalizer::from_replies(Vec::new()),
        SimTrackingProvider::default(),
    );
    h.session
        .registry()
        .write()
        .register_map(MapEntry::new(constants::TEST_MAP))
        .expect("Register failed");
    h.tracking.publish_frame(synthetic_frame(0.0));

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Attempts at 0, 250 and 500 ms
    assert_eq!(h.session.counters().attempt_count, 3);
    h.session.stop(true).await.expect("Stop failed");
}

#[tokio::test(start_paused = true)]
async fn test_no_frame_means_no_attempt() {
    let h = create_bare_harness(
        SessionConfig::default(),
        ScriptedLocalizer::new([40.0]).repeating(),
        SimTrackingProvider::default(),
    );
    h.session
        .registry()
        .write()
        .register_map(MapEntry::new(constants::TEST_MAP))
        .expect("Register failed");

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.session.counters().attempt_count, 0);

    h.tracking.publish_frame(synthetic_frame(1.0));
    wait_until(|| h.session.counters().success_count >= 1).await;
    h.session.stop(false).await.expect("Stop failed");
}

#[tokio::test(start_paused = true)]
async fn test_new_frames_are_picked_up() {
    let h = create_harness(ScriptedLocalizer::new([40.0]).repeating());

    h.session.start().await.expect("Start failed");
    wait_until(|| h.session.counters().success_count >= 1).await;

    assert_eq!(h.localizer.last_requested_maps(), Some(vec![constants::TEST_MAP]));

    h.tracking
        .set_device_to_world(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
    h.tracking.publish_frame(synthetic_frame(5.0));
    wait_until(|| h.session.last_result().is_some_and(|r| r.timestamp == 5.0)).await;
    h.session.stop(false).await.expect("Stop failed");

    let result = h.session.last_result().expect("No result");
    assert_eq!(result.camera_to_world.w_axis.truncate(), Vec3::new(2.0, 0.0, 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_tracking_loss_is_reported_and_survived() {
    let h = create_harness(ScriptedLocalizer::new([40.0]).repeating());
    h.tracking
        .set_sample_error(Some(LocalizationError::TrackingUnavailable("lost".into())));

    h.session.start().await.expect("Start failed");
    wait_until(|| h.session.counters().attempt_count >= 3).await;

    assert_eq!(h.session.counters().success_count, 0);
    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.localizer.calls(), 0);

    let failures = drain_events(&h.events)
        .into_iter()
        .filter(|event| {
            matches!(event, SessionEvent::Failed(LocalizationError::TrackingUnavailable(_)))
        })
        .count();
    assert!(failures >= 3);

    // Tracking comes back and the same cycle recovers
    h.tracking.set_sample_error(None);
    wait_until(|| h.session.counters().success_count >= 1).await;
    h.session.stop(false).await.expect("Stop failed");
}

#[tokio::test(start_paused = true)]
async fn test_scene_failure_is_reported_and_survived() {
    let tracking = Arc::new(SimTrackingProvider::default());
    let (sink, anchors) = ChannelSceneSink::new();
    drop(anchors);
    let session = LocalizationSession::new(
        SessionConfig::default(),
        Arc::new(ScriptedLocalizer::new([40.0]).repeating()),
        tracking.clone(),
        Arc::new(sink),
    );
    session
        .registry()
        .write()
        .register_map(MapEntry::new(MapId(1)).with_scene_attachment(Entity::from_raw(5)))
        .expect("Register failed");
    tracking.publish_frame(synthetic_frame(0.0));
    let events = session.subscribe();

    session.start().await.expect("Start failed");
    wait_until(|| session.counters().success_count >= 2).await;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.counters().alignment_skipped_count, 0);
    session.stop(false).await.expect("Stop failed");

    let events = drain_events(&events);
    let failures = events
        .iter()
        .filter(|event| matches!(event, SessionEvent::Failed(LocalizationError::SceneUpdate(_))))
        .count();
    assert!(failures >= 2);
    assert_eq!(events.last(), Some(&SessionEvent::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_trend_and_gate_reconfiguration() {
    let h = create_harness(ScriptedLocalizer::new([20.0, 30.0, 40.0]).repeating());

    h.session.start().await.expect("Start failed");
    wait_until(|| h.session.counters().success_count >= 3).await;
    h.session.stop(false).await.expect("Stop failed");

    assert_eq!(h.session.confidence_history(), vec![40.0, 30.0, 20.0]);
    assert_eq!(h.session.confidence_trend(), ConfidenceTrend::Increasing);

    h.session.reconfigure_gate(GateConfig {
        max_history_size: 1,
        absolute_minimum_confidence: 25.0,
        ..Default::default()
    });
    assert_eq!(h.session.confidence_history(), vec![40.0]);
    assert_eq!(h.session.confidence_trend(), ConfidenceTrend::InsufficientData);

    // The script wraps to 20, now under the raised floor
    let outcome = h.session.localize_once().await.expect("No cached frame");
    assert!(matches!(outcome, CycleOutcome::Skipped(result) if result.confidence == 20.0));
    assert_eq!(h.session.counters().alignment_skipped_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_map_set_is_reported() {
    let h = create_bare_harness(
        SessionConfig::default(),
        ScriptedLocalizer::new([40.0]),
        SimTrackingProvider::default(),
    );
    h.tracking.publish_frame(synthetic_frame(0.0));

    h.session.start().await.expect("Start failed");
    wait_until(|| h.session.counters().attempt_count >= 2).await;

    assert_eq!(h.localizer.calls(), 0);
    assert_eq!(h.session.state(), SessionState::Active);
    h.session.stop(true).await.expect("Stop failed");

    let events = drain_events(&h.events);
    assert!(events.contains(&SessionEvent::Failed(LocalizationError::EmptyMapSet)));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_map_is_reported() {
    let tracking = Arc::new(SimTrackingProvider::default());
    let scene = Arc::new(RecordingSceneSink::new());
    let session = LocalizationSession::new(
        SessionConfig::default(),
        Arc::new(StrayLocalizer),
        tracking.clone(),
        scene.clone(),
    );
    session
        .registry()
        .write()
        .register_map(MapEntry::new(MapId(1)))
        .expect("Register failed");
    tracking.publish_frame(synthetic_frame(0.0));
    let events = session.subscribe();

    session.start().await.expect("Start failed");
    wait_until(|| session.counters().success_count >= 1).await;
    session.stop(false).await.expect("Stop failed");

    // The result is still published before alignment fails
    assert_eq!(session.last_result().map(|r| r.map_id), Some(MapId(42)));
    assert!(scene.updates().is_empty());
    assert!(drain_events(&events)
        .contains(&SessionEvent::Failed(LocalizationError::MapNotFound(MapId(42)))));
}

#[tokio::test(start_paused = true)]
async fn test_localize_once_requires_frame() {
    let h = create_bare_harness(
        SessionConfig::default(),
        ScriptedLocalizer::new([40.0]),
        SimTrackingProvider::default(),
    );

    let outcome = h.session.localize_once().await;
    assert_eq!(outcome, Err(LocalizationError::FrameNotAvailable));
}

#[tokio::test(start_paused = true)]
async fn test_localize_once_aligns() {
    let h = create_harness(
        ScriptedLocalizer::new([40.0])
            .repeating()
            .with_pose(Vec3::new(0.0, 0.0, 2.0), Quat::IDENTITY),
    );

    h.session.start().await.expect("Start failed");
    h.session.pause().await.expect("Pause failed");

    let outcome = h.session.localize_once().await.expect("No cached frame");
    let (result, update) = match outcome {
        CycleOutcome::Aligned { result, update } => (result, update),
        other => panic!("Expected alignment, got {other:?}"),
    };
    assert_eq!(result.confidence, 40.0);
    assert_eq!(update.map_id, constants::TEST_MAP);

    // Camera 2 m along +z in map space puts the map origin 2 m behind it
    let translation = update.placement.w_axis.truncate();
    assert!((translation - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-5);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_discards_in_flight_result() {
    let h = create_harness(ScriptedLocalizer::new([40.0]).with_latency(Duration::from_secs(1)));

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.localizer.calls(), 1);

    let stopping = Instant::now();
    h.session.stop(false).await.expect("Stop failed");
    assert!(stopping.elapsed() >= Duration::from_millis(900));

    assert_eq!(h.session.counters().success_count, 0);
    assert_eq!(h.session.last_result(), None);
    assert_eq!(
        drain_events(&h.events),
        vec![SessionEvent::Started, SessionEvent::Stopped]
    );
}

#[tokio::test(start_paused = true)]
async fn test_forced_stop_abandons_in_flight_call() {
    let h = create_harness(ScriptedLocalizer::new([40.0]).with_latency(Duration::from_secs(1)));

    h.session.start().await.expect("Start failed");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stopping = Instant::now();
    h.session.stop(true).await.expect("Stop failed");
    assert!(stopping.elapsed() < Duration::from_millis(100));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.session.counters().success_count, 0);
    assert_eq!(
        drain_events(&h.events),
        vec![SessionEvent::Started, SessionEvent::Stopped]
    );
}
