//! Hands operations to the package manager and classifies how they ended.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::backend::{FailureCategory, ManagerOutcome, ManagerRequest, PackageBackend, ProgressEvent};
use crate::error::InstallError;
use crate::package::{EntryId, Operation};

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub entry: EntryId,
    pub operation: Operation,
    pub path: PathBuf,
    /// `name:arch` of the package.
    pub package: String,
    /// Flips to `true` when the caller wants the run interrupted.
    pub cancel: watch::Receiver<bool>,
}

pub struct OperationExecutor {
    backend: Arc<dyn PackageBackend>,
}

impl OperationExecutor {
    pub fn new(backend: Arc<dyn PackageBackend>) -> Self {
        Self { backend }
    }

    /// Run one operation. Progress goes to `progress` while it runs; the
    /// return value is the terminal result.
    #[tracing::instrument(skip(self, request, progress), fields(entry = %request.entry, operation = %request.operation))]
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<(), InstallError> {
        let operation = request.operation;
        let outcome = self
            .backend
            .run(
                ManagerRequest {
                    operation,
                    path: request.path,
                    package: request.package.clone(),
                },
                progress,
                request.cancel,
            )
            .await;

        match outcome {
            Ok(ManagerOutcome::Succeeded) => {
                info!("{} of {} succeeded", operation, request.package);
                Ok(())
            }
            Ok(ManagerOutcome::Failed {
                category,
                diagnostic,
            }) => {
                warn!("{} of {} failed: {:?}", operation, request.package, category);
                Err(classify_failure(operation, category, diagnostic))
            }
            Err(err) => Err(generic_failure(operation, format!("{:#}", err))),
        }
    }
}

fn classify_failure(operation: Operation, category: FailureCategory, diagnostic: String) -> InstallError {
    match category {
        FailureCategory::Network => InstallError::NetworkFailure(diagnostic),
        FailureCategory::Disk => InstallError::InsufficientDiskSpace(None),
        FailureCategory::Signature => InstallError::MissingOrInvalidSignature,
        FailureCategory::Dependency(names) if !names.is_empty() => {
            InstallError::BrokenDependencies(names)
        }
        _ => generic_failure(operation, diagnostic),
    }
}

fn generic_failure(operation: Operation, detail: String) -> InstallError {
    match operation {
        Operation::Install | Operation::Reinstall => InstallError::InstallFailure(detail),
        Operation::Uninstall => InstallError::UninstallFailure(detail),
    }
}
