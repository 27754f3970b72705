use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single task.
///
/// `Pending -> Sent -> Acknowledged -> Completed`, with `Sent -> Pending` on an
/// ack timeout while attempts remain. Any non-terminal state can end in
/// `Cancelled` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Sent,
    Acknowledged,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Sent or Acknowledged, i.e. the controller may be executing the script.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::Sent | TaskState::Acknowledged)
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Pending
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Sent => write!(f, "sent"),
            TaskState::Acknowledged => write!(f, "acknowledged"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle of a fabrication run as seen from the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    Idle,
    Running,
    /// The run stopped on a task that did not complete.
    Halted { key: u64 },
    Finished,
    Stopped,
}

impl Default for SequencerState {
    fn default() -> Self {
        SequencerState::Idle
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "idle"),
            SequencerState::Running => write!(f, "running"),
            SequencerState::Halted { key } => write!(f, "halted on task {}", key),
            SequencerState::Finished => write!(f, "finished"),
            SequencerState::Stopped => write!(f, "stopped"),
        }
    }
}
