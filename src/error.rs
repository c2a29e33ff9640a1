//! Per-entry failure taxonomy and queue command errors.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::package::{EntryId, EntryStatus};

/// Why a package could not be admitted, installed or removed.
///
/// These are recorded on the entry that failed; they never abort the rest
/// of a session.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum InstallError {
    #[error("package already added")]
    AlreadyAdded,

    #[error("not a valid package archive: {0}")]
    Corrupt(String),

    #[error("unmatched package architecture: {package} (host supports {host})")]
    ArchitectureMismatch { package: String, host: String },

    #[error("installation of {0} is prohibited by the administrator")]
    Prohibited(String),

    #[error("package does not have a valid digital signature")]
    MissingOrInvalidSignature,

    /// The shortfall is known when the check was ours; the package manager
    /// only reports that it ran out.
    #[error("insufficient disk space{}", .0.as_ref().map(|s| format!(": {}", s)).unwrap_or_default())]
    InsufficientDiskSpace(Option<SpaceShortfall>),

    #[error("broken dependencies: {}", .0.join(", "))]
    BrokenDependencies(Vec<String>),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("installation failed: {0}")]
    InstallFailure(String),

    #[error("uninstall failed: {0}")]
    UninstallFailure(String),
}

/// Bytes a package needs against bytes free on the target filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpaceShortfall {
    pub required: u64,
    pub available: u64,
}

impl fmt::Display for SpaceShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes required, {} available",
            self.required, self.available
        )
    }
}

/// Misuse of the queue's command surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("no entry with id {0}")]
    UnknownEntry(EntryId),

    #[error("entry {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: EntryId,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("entry {0} is not waiting")]
    NotWaiting(EntryId),

    #[error("entry {0} has not failed and cannot be retried")]
    NotRetryable(EntryId),

    #[error("entry {0} is not installed on the system")]
    NotInstalled(EntryId),

    #[error("entry {0} is still being processed")]
    Busy(EntryId),

    #[error("the uninstall prompt for entry {0} is stale")]
    StalePrompt(EntryId),

    #[error("could not inspect dependencies: {0}")]
    Inspection(InstallError),

    #[error("could not plan the removal: {0}")]
    RemovalPlanning(InstallError),

    #[error(transparent)]
    Admission(#[from] InstallError),
}
