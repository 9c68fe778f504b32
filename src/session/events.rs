//! Live session status events.
//!
//! Delivery is single-subscriber: each call to [`EventStream::subscribe`]
//! replaces the previous receiver, and events emitted while nobody is
//! subscribed are dropped. These are status notifications, not a log.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::LocalizationError;
use crate::transform::ComposedLocalizationResult;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started,
    Result(ComposedLocalizationResult),
    Failed(LocalizationError),
    Stopped,
}

#[derive(Debug, Default)]
pub struct EventStream {
    sender: Mutex<Option<Sender<SessionEvent>>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new receiver, detaching the previous one
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        *self.sender.lock() = Some(tx);
        rx
    }

    pub fn unsubscribe(&self) {
        self.sender.lock().take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Deliver `event` to the current subscriber. Returns false if it was
    /// dropped because there is none or the receiver has gone away.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let mut sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return false;
        };
        if tx.send(event).is_err() {
            sender.take();
            return false;
        }
        true
    }
}
