//! Session lifecycle state machine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not running; never started, stopped or reset
    #[default]
    Idle,
    /// The repeating cycle is running
    Active,
    /// Cycle cancelled by `pause`, counters and subscriptions retained
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
}

impl SessionState {
    /// State reached by applying `command`, or `None` when the command is a
    /// no-op in this state.
    pub fn apply(self, command: LifecycleCommand) -> Option<SessionState> {
        use LifecycleCommand::*;
        use SessionState::*;
        match (self, command) {
            (Idle, Start) | (Suspended, Start) => Some(Active),
            (Active, Pause) => Some(Suspended),
            (Suspended, Resume) | (Idle, Resume) => Some(Active),
            (Active, Stop) => Some(Idle),
            (Active, Reset) | (Suspended, Reset) => Some(Idle),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }
}

/// Attempt, success and skipped-alignment counts since the last reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    pub attempt_count: u64,
    pub success_count: u64,
    pub alignment_skipped_count: u64,
}
