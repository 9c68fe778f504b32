//! Localization Session Engine
//!
//! Owns the repeating localize-and-align cycle for one session:
//! - lifecycle (`start`, `pause`, `resume`, `stop`, `reset`) driven by an
//!   explicit state machine, where commands that do not apply are no-ops
//! - one tokio task per active session running the cycle, cancelled through
//!   a [`CancelToken`] checked at every suspension point
//! - a single-subscriber [`EventStream`] of lifecycle and result events
//!
//! Failures inside the cycle are published as [`SessionEvent::Failed`] and
//! never end the session. Only acquiring the tracking session in `start` can
//! fail the call itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::{Localizer, SceneUpdateSink, TrackingProvider};
use crate::config::SessionConfig;
use crate::error::{LocalizationError, LocalizationResult};
use crate::gate::{ConfidenceGate, ConfidenceTrend, GateConfig};
use crate::registry::MapHandleRegistry;
use crate::transform::ComposedLocalizationResult;

mod cycle;
mod events;
mod state;

pub use cycle::{CancelToken, CycleOutcome};
pub use events::{EventStream, SessionEvent};
pub use state::{LifecycleCommand, SessionCounters, SessionState};

use cycle::{run_cycle, SessionShared};

/// The running cycle task and the token that stops it
struct CycleTask {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl CycleTask {
    /// Cancel and wait for the task to finish. With `abort` a pending
    /// localize call is abandoned instead of awaited.
    async fn shutdown(self, abort: bool) -> LocalizationResult<()> {
        self.cancel.cancel();
        if abort {
            self.handle.abort();
        }
        match self.handle.await {
            Ok(()) => Ok(()),
            Err(join_error) if join_error.is_cancelled() => Ok(()),
            Err(join_error) => {
                error!(%join_error, "localization cycle panicked");
                Err(LocalizationError::CycleTerminated(join_error.to_string()))
            }
        }
    }
}

pub struct LocalizationSession {
    shared: Arc<SessionShared>,
    /// Serializes lifecycle commands and holds the active task
    task: tokio::sync::Mutex<Option<CycleTask>>,
}

impl LocalizationSession {
    pub fn new(
        config: SessionConfig,
        localizer: Arc<dyn Localizer>,
        tracking: Arc<dyn TrackingProvider>,
        scene: Arc<dyn SceneUpdateSink>,
    ) -> Self {
        Self::with_registry(
            config,
            localizer,
            tracking,
            scene,
            Arc::new(RwLock::new(MapHandleRegistry::new())),
        )
    }

    /// Build a session around an existing registry
    pub fn with_registry(
        config: SessionConfig,
        localizer: Arc<dyn Localizer>,
        tracking: Arc<dyn TrackingProvider>,
        scene: Arc<dyn SceneUpdateSink>,
        registry: Arc<RwLock<MapHandleRegistry>>,
    ) -> Self {
        let config = config.normalized();
        let gate = ConfidenceGate::new(config.gate.clone());
        Self {
            shared: Arc::new(SessionShared {
                config,
                localizer,
                tracking,
                scene,
                registry,
                events: EventStream::new(),
                state: Mutex::new(SessionState::Idle),
                counters: Mutex::new(SessionCounters::default()),
                last_result: Mutex::new(None),
                gate: Mutex::new(gate),
                frames: Mutex::new(None),
                frame_cache: Mutex::new(None),
                ever_localized: AtomicBool::new(false),
                body_lock: tokio::sync::Mutex::new(()),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Acquire tracking, emit [`SessionEvent::Started`] and launch the cycle.
    /// A no-op when already active.
    pub async fn start(&self) -> LocalizationResult<()> {
        let mut task = self.task.lock().await;
        self.start_locked(&mut task).await
    }

    async fn start_locked(&self, task: &mut Option<CycleTask>) -> LocalizationResult<()> {
        let Some(next) = self.shared.state().apply(LifecycleCommand::Start) else {
            debug!("start ignored, session already active");
            return Ok(());
        };

        if let Err(error) = self.shared.tracking.start_session().await {
            warn!(%error, "tracking session failed to start");
            return Err(error);
        }

        *self.shared.frames.lock() = Some(self.shared.tracking.frames());
        if self.shared.cached_frame().is_none() {
            match self.shared.tracking.latest_frame().await {
                Ok(frame) => *self.shared.frame_cache.lock() = Some(frame),
                Err(error) => debug!(%error, "no frame available yet"),
            }
        }

        self.shared.set_state(next);
        self.shared.events.emit(SessionEvent::Started);
        info!("localization session started");

        *task = Some(self.spawn_cycle());
        Ok(())
    }

    fn spawn_cycle(&self) -> CycleTask {
        let cancel = CancelToken::new();
        let handle = tokio::spawn(run_cycle(Arc::clone(&self.shared), cancel.clone()));
        CycleTask { cancel, handle }
    }

    /// Cancel the cycle and keep everything else; silent
    pub async fn pause(&self) -> LocalizationResult<()> {
        let mut task = self.task.lock().await;
        let Some(next) = self.shared.state().apply(LifecycleCommand::Pause) else {
            return Ok(());
        };

        self.shared.set_state(next);
        if let Some(running) = task.take() {
            running.shutdown(true).await?;
        }
        info!("localization session paused");
        Ok(())
    }

    /// Relaunch the cycle after `pause`; silent. An idle session is started.
    pub async fn resume(&self) -> LocalizationResult<()> {
        let mut task = self.task.lock().await;
        match self.shared.state() {
            SessionState::Active => Ok(()),
            SessionState::Idle => self.start_locked(&mut task).await,
            SessionState::Suspended => {
                self.shared.set_state(SessionState::Active);
                *task = Some(self.spawn_cycle());
                info!("localization session resumed");
                Ok(())
            }
        }
    }

    /// End the session and emit [`SessionEvent::Stopped`].
    ///
    /// With `force_cancel` a localize call in flight is abandoned; otherwise
    /// it is awaited and its result discarded.
    pub async fn stop(&self, force_cancel: bool) -> LocalizationResult<()> {
        let mut task = self.task.lock().await;
        self.stop_locked(&mut task, force_cancel).await
    }

    async fn stop_locked(
        &self,
        task: &mut Option<CycleTask>,
        force_cancel: bool,
    ) -> LocalizationResult<()> {
        let Some(next) = self.shared.state().apply(LifecycleCommand::Stop) else {
            return Ok(());
        };

        self.shared.set_state(next);
        let shutdown = match task.take() {
            Some(running) => running.shutdown(force_cancel).await,
            None => Ok(()),
        };
        self.shared.frames.lock().take();
        self.shared.events.emit(SessionEvent::Stopped);
        info!(force_cancel, "localization session stopped");
        shutdown
    }

    /// Force-stop if active, then clear counters, the last result and the
    /// confidence history. Registered maps are kept. Waits for a running
    /// [`localize_once`](Self::localize_once) so its result is cleared too.
    pub async fn reset(&self) -> LocalizationResult<()> {
        let mut task = self.task.lock().await;
        match self.shared.state() {
            SessionState::Active => self.stop_locked(&mut task, true).await?,
            SessionState::Suspended => {
                if let Some(running) = task.take() {
                    running.shutdown(true).await?;
                }
                self.shared.frames.lock().take();
                self.shared.set_state(SessionState::Idle);
            }
            SessionState::Idle => {}
        }

        // A `localize_once` still in flight finishes before the wipe
        let _body = self.shared.body_lock.lock().await;
        *self.shared.counters.lock() = SessionCounters::default();
        self.shared.last_result.lock().take();
        self.shared.gate.lock().clear();
        self.shared.ever_localized.store(false, Ordering::Release);
        info!("localization session reset");
        Ok(())
    }

    /// Run the cycle body once against the most recent cached frame
    pub async fn localize_once(&self) -> LocalizationResult<CycleOutcome> {
        let frame = self
            .shared
            .cached_frame()
            .ok_or(LocalizationError::FrameNotAvailable)?;
        Ok(self.shared.run_body(frame, None).await)
    }

    /// Attach the event receiver, replacing any previous subscriber
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn counters(&self) -> SessionCounters {
        *self.shared.counters.lock()
    }

    pub fn last_result(&self) -> Option<ComposedLocalizationResult> {
        *self.shared.last_result.lock()
    }

    /// Recorded confidences, newest first
    pub fn confidence_history(&self) -> Vec<f32> {
        self.shared.gate.lock().history()
    }

    pub fn confidence_trend(&self) -> ConfidenceTrend {
        self.shared.gate.lock().trend()
    }

    pub fn reconfigure_gate(&self, config: GateConfig) {
        self.shared.gate.lock().reconfigure(config);
    }

    /// The session's map registry, shared with the host for registration
    pub fn registry(&self) -> Arc<RwLock<MapHandleRegistry>> {
        Arc::clone(&self.shared.registry)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for LocalizationSession {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            running.cancel.cancel();
            running.handle.abort();
        }
    }
}
