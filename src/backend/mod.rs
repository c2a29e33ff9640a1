//! Boundary to the system package manager.
//!
//! Everything the engine needs from dpkg/apt goes through [`PackageBackend`],
//! so the queue, validator and executor can be driven by a mock in tests.
//! [`AptBackend`] is the real implementation; [`diagnostics`] is the only
//! place that knows the shape of apt's and dpkg's text output.

mod apt;
pub mod diagnostics;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};

use crate::package::{Operation, PackageMetadata};

pub use apt::AptBackend;

/// Control metadata and signature presence read from a package file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageQuery {
    pub metadata: PackageMetadata,
    /// Whether the archive carries any signature member at all.
    pub signature_present: bool,
}

/// Result of verifying a package signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    Missing,
    Invalid(String),
}

/// Broad class of a package manager failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum FailureCategory {
    Network,
    Disk,
    Signature,
    /// Unmet dependencies, by name, in the order the manager reported them.
    Dependency(Vec<String>),
    Generic,
}

/// What a dry run of installing a package file reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyReport {
    /// Dependencies not currently satisfied on the system, in manager order.
    pub broken: Vec<String>,
    /// Whether the manager can satisfy `broken` from its configured sources.
    pub resolvable: bool,
    /// Set when the dry run itself failed for a reason other than dependencies.
    pub failure: Option<(FailureCategory, String)>,
}

/// A package the manager would remove along with the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedPackage {
    pub name: String,
    /// Installed packages that depend on this one.
    pub required_by: Vec<String>,
    pub essential: bool,
}

/// What a dry run of removing a package reported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RemovalReport {
    pub target_essential: bool,
    /// Other packages removed with the target, in manager order.
    pub affected: Vec<AffectedPackage>,
}

/// A request handed to the package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerRequest {
    pub operation: Operation,
    /// Package file for install and reinstall.
    pub path: PathBuf,
    /// `name:arch` of the package, used for removal.
    pub package: String,
}

/// How a package manager run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerOutcome {
    Succeeded,
    Failed {
        category: FailureCategory,
        diagnostic: String,
    },
}

impl ManagerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ManagerOutcome::Succeeded)
    }
}

/// Progress reported while an operation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Overall completion as reported by the manager.
    Status { percent: f32, message: String },
    /// A line of manager output that carried no structured status.
    Output { line: String },
    /// Dependencies that will be fetched and installed first.
    DependenciesPending { names: Vec<String> },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageBackend: Send + Sync {
    /// Architectures the host accepts: the native one first, then foreign ones.
    async fn host_architectures(&self) -> Result<Vec<String>>;

    /// Read control metadata and signature presence from a package file.
    async fn query(&self, path: &Path) -> Result<PackageQuery>;

    async fn verify_signature(&self, path: &Path) -> Result<SignatureStatus>;

    /// Version of `name` for `architecture` currently installed, if any.
    async fn installed_version(&self, name: &str, architecture: &str) -> Result<Option<String>>;

    /// Dry-run installing the package file and report its dependency state.
    async fn compute_dependencies(&self, path: &Path) -> Result<DependencyReport>;

    /// Dry-run removing `package` and report what else would go with it.
    async fn compute_removal(&self, package: &str) -> Result<RemovalReport>;

    /// Run an operation to completion.
    ///
    /// Progress is sent on `progress` as it arrives. When `cancel` flips to
    /// `true` the manager is asked to stop; the outcome still reflects how the
    /// process actually exited.
    async fn run(
        &self,
        request: ManagerRequest,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Result<ManagerOutcome>;
}
