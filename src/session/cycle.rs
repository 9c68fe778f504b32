//! The repeating localize-and-align cycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::events::{EventStream, SessionEvent};
use super::state::{SessionCounters, SessionState};
use crate::collaborators::{
    Frame, LocalizeRequest, Localizer, SceneUpdate, SceneUpdateSink, TrackingProvider,
};
use crate::config::SessionConfig;
use crate::error::{LocalizationError, Severity};
use crate::gate::ConfidenceGate;
use crate::registry::MapHandleRegistry;
use crate::transform::{compose_result, ComposedLocalizationResult};

/// Cooperative cancellation flag shared between the engine and one cycle task
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancellation arrives first
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

/// How one pass through the cycle body ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Cancelled at a suspension point, or a late result was discarded
    Cancelled,
    /// A failure was published on the event stream
    Failed(LocalizationError),
    /// Published, but the alignment gate held the scene still
    Skipped(ComposedLocalizationResult),
    /// Published and handed to the scene
    Aligned {
        result: ComposedLocalizationResult,
        update: SceneUpdate,
    },
}

/// State shared between the session handle and its cycle task
pub(crate) struct SessionShared {
    pub config: SessionConfig,
    pub localizer: Arc<dyn Localizer>,
    pub tracking: Arc<dyn TrackingProvider>,
    pub scene: Arc<dyn SceneUpdateSink>,
    pub registry: Arc<RwLock<MapHandleRegistry>>,
    pub events: EventStream,
    pub state: Mutex<SessionState>,
    pub counters: Mutex<SessionCounters>,
    pub last_result: Mutex<Option<ComposedLocalizationResult>>,
    pub gate: Mutex<ConfidenceGate>,
    pub frames: Mutex<Option<watch::Receiver<Option<Frame>>>>,
    pub frame_cache: Mutex<Option<Frame>>,
    pub ever_localized: AtomicBool,
    /// Held for the whole cycle body so bodies never overlap
    pub body_lock: tokio::sync::Mutex<()>,
}

impl SessionShared {
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "session state change");
            *state = next;
        }
    }

    /// Newest frame seen on the subscription, falling back to the last one
    /// cached
    pub fn cached_frame(&self) -> Option<Frame> {
        let mut cache = self.frame_cache.lock();
        if let Some(rx) = self.frames.lock().as_mut() {
            if let Some(frame) = rx.borrow_and_update().as_ref() {
                *cache = Some(frame.clone());
            }
        }
        cache.clone()
    }

    pub fn retry_interval(&self) -> Duration {
        if self.ever_localized.load(Ordering::Acquire) {
            self.config.steady_retry_interval()
        } else {
            self.config.cold_retry_interval()
        }
    }

    fn report(&self, error: LocalizationError) -> CycleOutcome {
        match error.severity() {
            Severity::Info => debug!(%error, "localization attempt failed"),
            Severity::Warning => warn!(%error, "localization attempt failed"),
            Severity::Error | Severity::Critical => {
                error!(%error, kind = ?error.kind(), "localization attempt failed")
            }
        }
        self.events.emit(SessionEvent::Failed(error.clone()));
        CycleOutcome::Failed(error)
    }

    /// One pass of the cycle body against `frame`.
    ///
    /// Failures are published on the event stream and returned in the
    /// outcome; they never escape as errors.
    pub async fn run_body(&self, frame: Frame, cancel: Option<&CancelToken>) -> CycleOutcome {
        let _body = self.body_lock.lock().await;
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);

        self.counters.lock().attempt_count += 1;

        let sample = match cancel {
            Some(token) => token.run(self.tracking.tracking_sample(frame.timestamp)).await,
            None => Some(self.tracking.tracking_sample(frame.timestamp).await),
        };
        let sample = match sample {
            None => return CycleOutcome::Cancelled,
            Some(Err(error)) => return self.report(error),
            Some(Ok(sample)) => sample,
        };

        let (map_ids, handles) = {
            let registry = self.registry.read();
            let map_ids = self.localizer.required_map_ids(&registry);
            let handles = registry.ids_to_handles(&map_ids);
            (map_ids, handles)
        };
        if map_ids.is_empty() {
            return self.report(LocalizationError::EmptyMapSet);
        }

        let request = LocalizeRequest {
            map_ids,
            handles,
            camera: frame.camera_params(),
            frame: frame.clone(),
        };
        let raw = self.localizer.localize(request).await;

        // The call may have been in flight when the session was stopped
        if cancelled() {
            debug!("discarding localization result after cancellation");
            return CycleOutcome::Cancelled;
        }

        let raw = match raw.and_then(|raw| raw.validate()) {
            Ok(raw) => raw,
            Err(error) => return self.report(error),
        };

        self.counters.lock().success_count += 1;
        self.ever_localized.store(true, Ordering::Release);

        let result = compose_result(&sample, frame.camera_to_device, &raw);
        *self.last_result.lock() = Some(result);
        self.events.emit(SessionEvent::Result(result));
        info!(
            map_id = %result.map_id,
            confidence = result.confidence,
            "localized"
        );

        if !self.gate.lock().should_align(raw.confidence) {
            self.counters.lock().alignment_skipped_count += 1;
            debug!(confidence = raw.confidence, "alignment skipped");
            return CycleOutcome::Skipped(result);
        }

        let extrinsics = self
            .cached_frame()
            .map_or(frame.camera_to_device, |current| current.camera_to_device);
        let tracked_to_world = sample.device_to_world * extrinsics;

        let entry = self.registry.read().entry(raw.map_id).cloned();
        let Some(entry) = entry else {
            return self.report(LocalizationError::MapNotFound(raw.map_id));
        };

        match self.scene.apply_pose(&entry, &result, tracked_to_world) {
            Ok(update) => CycleOutcome::Aligned { result, update },
            Err(error) => self.report(error),
        }
    }
}

/// Body of the cycle task; runs until cancelled or the session leaves
/// `Active`.
pub(crate) async fn run_cycle(shared: Arc<SessionShared>, cancel: CancelToken) {
    debug!("localization cycle started");
    loop {
        if cancel.is_cancelled() || !shared.state().is_active() {
            break;
        }

        if let Some(frame) = shared.cached_frame() {
            if shared.run_body(frame, Some(&cancel)).await == CycleOutcome::Cancelled {
                break;
            }
        }

        let interval = shared.retry_interval();
        if cancel.run(tokio::time::sleep(interval)).await.is_none() {
            break;
        }
    }
    debug!("localization cycle exited");
}
