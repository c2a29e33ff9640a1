use serde::Serialize;

use crate::backend::ProgressEvent;
use crate::package::{EntryId, EntrySnapshot, EntryStatus};

/// Notifications published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A new entry was recorded, waiting or already failed.
    Admitted { entry: EntrySnapshot },
    /// An entry moved between states; `entry` is the state after the move.
    StatusChanged {
        from: EntryStatus,
        entry: EntrySnapshot,
    },
    /// Progress from the package manager for the active entry.
    Progress { id: EntryId, progress: ProgressEvent },
    /// An entry left the queue without touching the system.
    Withdrawn { id: EntryId },
}
