//! Queue entries: one candidate package file and its lifecycle.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::PackageMetadata;
use crate::error::{InstallError, QueueError};

/// Identifier of an entry within one queue session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status of an entry, without the failure payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Waiting,
    Installing,
    Installed,
    Uninstalling,
    Failed,
    Removed,
}

impl EntryStatus {
    /// Whether an operation is running against the system for this entry.
    pub fn is_active(self) -> bool {
        matches!(self, EntryStatus::Installing | EntryStatus::Uninstalling)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntryStatus::Installed | EntryStatus::Removed | EntryStatus::Failed
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Installing => "installing",
            EntryStatus::Installed => "installed",
            EntryStatus::Uninstalling => "uninstalling",
            EntryStatus::Failed => "failed",
            EntryStatus::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state. The failure reason lives inside `Failed`, so an entry
/// carries a reason exactly when it has failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Waiting,
    Installing,
    Installed,
    Uninstalling,
    Failed(InstallError),
    Removed,
}

impl EntryState {
    pub fn status(&self) -> EntryStatus {
        match self {
            EntryState::Waiting => EntryStatus::Waiting,
            EntryState::Installing => EntryStatus::Installing,
            EntryState::Installed => EntryStatus::Installed,
            EntryState::Uninstalling => EntryStatus::Uninstalling,
            EntryState::Failed(_) => EntryStatus::Failed,
            EntryState::Removed => EntryStatus::Removed,
        }
    }
}

/// How an already-installed copy of the same package relates to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstalledComparison {
    /// Nothing with this name and architecture is installed.
    #[default]
    #[serde(rename = "none")]
    NotInstalled,
    /// The same version is installed.
    Same,
    /// An earlier version is installed.
    Older,
    /// A later version is installed.
    Newer,
}

/// Operation handed to the package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Reinstall,
    Uninstall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install => write!(f, "install"),
            Operation::Reinstall => write!(f, "reinstall"),
            Operation::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Outcome of a dependency inspection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DependencyVerdict {
    pub ok: bool,
    /// Dependencies that cannot be satisfied locally, in the manager's order.
    pub broken: Vec<String>,
    /// Dependencies the manager will fetch and install along with the package.
    pub pending: Vec<String>,
}

impl DependencyVerdict {
    pub fn satisfied() -> Self {
        DependencyVerdict {
            ok: true,
            ..Default::default()
        }
    }
}

/// One package file tracked by the queue.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    id: EntryId,
    path: PathBuf,
    digest: String,
    metadata: PackageMetadata,
    attempt: u32,
    state: EntryState,
    /// Install checks still owed before this attempt may run.
    unscreened: bool,
    pub dependency_summary: Option<DependencyVerdict>,
    pub installed_comparison: InstalledComparison,
    pub installed_version: Option<String>,
}

impl PackageEntry {
    pub fn new(
        id: EntryId,
        path: PathBuf,
        digest: String,
        metadata: PackageMetadata,
        state: EntryState,
    ) -> Self {
        Self {
            id,
            path,
            digest,
            metadata,
            attempt: 1,
            state,
            unscreened: false,
            dependency_summary: None,
            installed_comparison: InstalledComparison::NotInstalled,
            installed_version: None,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn architecture(&self) -> &str {
        &self.metadata.architecture
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> &EntryState {
        &self.state
    }

    pub fn status(&self) -> EntryStatus {
        self.state.status()
    }

    pub fn failure(&self) -> Option<&InstallError> {
        match &self.state {
            EntryState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether some version of this package is present on the system.
    pub fn is_present_on_system(&self) -> bool {
        self.installed_comparison != InstalledComparison::NotInstalled
    }

    /// Whether the install checks must run before this entry is installed.
    pub fn is_unscreened(&self) -> bool {
        self.unscreened
    }

    pub(crate) fn set_unscreened(&mut self, unscreened: bool) {
        self.unscreened = unscreened;
    }

    /// Replace this record with a fresh attempt, keeping id and position.
    pub(crate) fn into_retry(self, fresh: PackageEntry) -> PackageEntry {
        PackageEntry {
            id: self.id,
            attempt: self.attempt + 1,
            ..fresh
        }
    }

    /// Take the file details found by a later admission of the same entry.
    pub(crate) fn reload(&mut self, path: PathBuf, digest: String, metadata: PackageMetadata) {
        self.path = path;
        self.digest = digest;
        self.metadata = metadata;
    }

    /// Move to `next`, enforcing the lifecycle rules.
    pub(crate) fn transition(&mut self, next: EntryState) -> Result<EntryStatus, QueueError> {
        let from = self.status();
        let to = next.status();
        let allowed = match (from, to) {
            (EntryStatus::Waiting, EntryStatus::Installing) => true,
            (EntryStatus::Waiting, EntryStatus::Failed) => true,
            (EntryStatus::Waiting, EntryStatus::Uninstalling) => self.is_present_on_system(),
            (EntryStatus::Installing, EntryStatus::Installed) => true,
            (EntryStatus::Installing, EntryStatus::Failed) => true,
            (EntryStatus::Installed, EntryStatus::Installing) => true,
            (EntryStatus::Installed, EntryStatus::Uninstalling) => true,
            (EntryStatus::Uninstalling, EntryStatus::Removed) => true,
            (EntryStatus::Uninstalling, EntryStatus::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        self.state = next;
        Ok(from)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            path: self.path.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            architecture: self.metadata.architecture.clone(),
            status: self.status(),
            failure_reason: self.failure().cloned(),
            dependency_summary: self.dependency_summary.clone(),
            installed_comparison: self.installed_comparison,
            installed_version: self.installed_version.clone(),
            attempt: self.attempt,
        }
    }
}

/// Read-only view of an entry for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub status: EntryStatus,
    pub failure_reason: Option<InstallError>,
    pub dependency_summary: Option<DependencyVerdict>,
    pub installed_comparison: InstalledComparison,
    pub installed_version: Option<String>,
    pub attempt: u32,
}
