//! Dependency checks run before an operation reaches the package manager.

use log::{debug, info};
use std::sync::Arc;

use crate::backend::{FailureCategory, PackageBackend, RemovalReport};
use crate::error::InstallError;
use crate::package::{DependencyVerdict, PackageEntry};

pub struct DependencyInspector {
    backend: Arc<dyn PackageBackend>,
}

impl DependencyInspector {
    pub fn new(backend: Arc<dyn PackageBackend>) -> Self {
        Self { backend }
    }

    /// Ask the manager whether the entry's dependencies can be satisfied.
    ///
    /// Missing dependencies the manager can fetch give an `ok` verdict with
    /// them listed as pending. Ones it cannot give `ok == false` with the
    /// names in the manager's order. `Err` is reserved for inspections that
    /// could not complete, such as a network failure.
    #[tracing::instrument(skip(self, entry), fields(package = %entry.name()))]
    pub async fn inspect(&self, entry: &PackageEntry) -> Result<DependencyVerdict, InstallError> {
        let report = self
            .backend
            .compute_dependencies(entry.path())
            .await
            .map_err(|e| InstallError::InstallFailure(format!("{:#}", e)))?;

        if let Some((category, diagnostic)) = report.failure {
            return Err(match category {
                FailureCategory::Network => InstallError::NetworkFailure(diagnostic),
                FailureCategory::Dependency(names) if !names.is_empty() => {
                    InstallError::BrokenDependencies(names)
                }
                FailureCategory::Disk => InstallError::InsufficientDiskSpace(None),
                FailureCategory::Signature => InstallError::MissingOrInvalidSignature,
                _ => InstallError::InstallFailure(diagnostic),
            });
        }

        if report.broken.is_empty() {
            debug!("All dependencies of {} are satisfied", entry.name());
            return Ok(DependencyVerdict::satisfied());
        }

        if report.resolvable {
            info!(
                "{} needs dependencies from the configured sources: {}",
                entry.name(),
                report.broken.join(", ")
            );
            return Ok(DependencyVerdict {
                ok: true,
                broken: Vec::new(),
                pending: report.broken,
            });
        }

        Ok(DependencyVerdict {
            ok: false,
            broken: report.broken,
            pending: Vec::new(),
        })
    }

    /// Ask the manager what removing the entry's package would take with it.
    #[tracing::instrument(skip(self, entry), fields(package = %entry.name()))]
    pub async fn inspect_removal(&self, entry: &PackageEntry) -> Result<RemovalReport, InstallError> {
        self.backend
            .compute_removal(&entry.metadata().qualified_name())
            .await
            .map_err(|e| InstallError::UninstallFailure(format!("{:#}", e)))
    }
}
