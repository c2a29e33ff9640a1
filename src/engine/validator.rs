//! Admission checks for candidate package files.

use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::backend::{PackageBackend, SignatureStatus};
use crate::error::{InstallError, SpaceShortfall};
use crate::package::{InstalledComparison, PackageMetadata, compare_versions};
use crate::runtime::Runtime;

/// Settings that decide whether a package may be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Accepted architectures. Empty means ask the package manager.
    pub architectures: Vec<String>,
    pub require_signature: bool,
    pub blocked: Vec<String>,
    /// Filesystem whose free space bounds what can be installed.
    pub target_root: PathBuf,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            architectures: Vec::new(),
            require_signature: false,
            blocked: Vec::new(),
            target_root: PathBuf::from("/"),
        }
    }
}

/// Paths and content digests already present in a session.
#[derive(Debug, Clone, Default)]
pub struct KnownPackages {
    paths: HashSet<PathBuf>,
    digests: HashSet<String>,
}

impl KnownPackages {
    pub fn insert(&mut self, path: &Path, digest: &str) {
        self.paths.insert(path.to_path_buf());
        self.digests.insert(digest.to_string());
    }

    pub fn contains(&self, path: &Path, digest: &str) -> bool {
        self.paths.contains(path) || self.digests.contains(digest)
    }
}

/// A package file whose metadata could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedPackage {
    /// Canonical path of the file.
    pub path: PathBuf,
    /// SHA-256 of the file contents, hex encoded.
    pub digest: String,
    pub metadata: PackageMetadata,
    pub installed_comparison: InstalledComparison,
    pub installed_version: Option<String>,
}

/// Result of screening a readable package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Passed every check; the entry starts out waiting.
    Accepted(AdmittedPackage),
    /// Readable but refused; the entry is recorded as failed so the reason
    /// stays visible.
    Rejected(AdmittedPackage, InstallError),
}

impl Admission {
    pub fn package(&self) -> &AdmittedPackage {
        match self {
            Admission::Accepted(package) | Admission::Rejected(package, _) => package,
        }
    }
}

pub struct Validator<R: Runtime> {
    runtime: Arc<R>,
    backend: Arc<dyn PackageBackend>,
    policy: AdmissionPolicy,
    host: OnceCell<Vec<String>>,
}

impl<R: Runtime + 'static> Validator<R> {
    pub fn new(runtime: Arc<R>, backend: Arc<dyn PackageBackend>, policy: AdmissionPolicy) -> Self {
        Self {
            runtime,
            backend,
            policy,
            host: OnceCell::new(),
        }
    }

    /// Architectures packages may target. Asked of the manager once per
    /// session unless the policy names them.
    pub async fn host_architectures(&self) -> anyhow::Result<&[String]> {
        let host = self
            .host
            .get_or_try_init(|| async {
                if self.policy.architectures.is_empty() {
                    self.backend.host_architectures().await
                } else {
                    Ok(self.policy.architectures.clone())
                }
            })
            .await?;
        Ok(host.as_slice())
    }

    /// Run the admission checks for `path`.
    ///
    /// `Err` means no entry should be created at all (duplicate or unreadable
    /// file). Every later check short-circuits into [`Admission::Rejected`].
    #[tracing::instrument(skip(self, known))]
    pub async fn admit(&self, path: &Path, known: &KnownPackages) -> Result<Admission, InstallError> {
        let (package, signature_present) = self.read(path, known).await?;
        match self.screen(&package, signature_present).await {
            Ok(()) => Ok(Admission::Accepted(package)),
            Err(reason) => {
                warn!("Rejected {}: {}", package.metadata.name, reason);
                Ok(Admission::Rejected(package, reason))
            }
        }
    }

    /// Admit a file only to learn which package it names and whether that
    /// package is on the system. None of the install checks apply.
    #[tracing::instrument(skip(self, known))]
    pub async fn admit_for_removal(
        &self,
        path: &Path,
        known: &KnownPackages,
    ) -> Result<AdmittedPackage, InstallError> {
        let (package, _) = self.read(path, known).await?;
        Ok(package)
    }

    /// Duplicate and readability checks, then the control metadata and the
    /// installed copy. Returns whether the file carries a signature.
    async fn read(
        &self,
        path: &Path,
        known: &KnownPackages,
    ) -> Result<(AdmittedPackage, bool), InstallError> {
        let path = self
            .runtime
            .canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());

        if known.paths.contains(&path) {
            debug!("{:?} is already in the queue", path);
            return Err(InstallError::AlreadyAdded);
        }
        if !self.runtime.is_file(&path) {
            return Err(InstallError::Corrupt(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let digest = self
            .digest(&path)
            .await
            .map_err(|e| InstallError::Corrupt(format!("{:#}", e)))?;
        if known.digests.contains(&digest) {
            debug!("{:?} has the same contents as a queued package", path);
            return Err(InstallError::AlreadyAdded);
        }

        let query = self
            .backend
            .query(&path)
            .await
            .map_err(|e| InstallError::Corrupt(format!("{:#}", e)))?;

        let (installed_version, installed_comparison) =
            self.compare_installed(&query.metadata).await;
        let package = AdmittedPackage {
            path,
            digest,
            metadata: query.metadata,
            installed_comparison,
            installed_version,
        };
        Ok((package, query.signature_present))
    }

    async fn screen(&self, package: &AdmittedPackage, signature_present: bool) -> Result<(), InstallError> {
        self.check_architecture(&package.metadata).await?;
        self.check_blocked(&package.metadata)?;
        self.check_signature(&package.path, signature_present).await?;
        self.check_disk(&package.metadata, &package.path)?;
        Ok(())
    }

    async fn check_architecture(&self, metadata: &PackageMetadata) -> Result<(), InstallError> {
        if matches!(metadata.architecture.as_str(), "all" | "any") {
            return Ok(());
        }

        let host = match self.host_architectures().await {
            Ok(host) => host,
            Err(err) => {
                warn!("Could not determine host architectures: {:#}", err);
                return Err(InstallError::ArchitectureMismatch {
                    package: metadata.architecture.clone(),
                    host: "unknown".into(),
                });
            }
        };

        if host.iter().any(|arch| *arch == metadata.architecture) {
            Ok(())
        } else {
            Err(InstallError::ArchitectureMismatch {
                package: metadata.architecture.clone(),
                host: host.join(", "),
            })
        }
    }

    fn check_blocked(&self, metadata: &PackageMetadata) -> Result<(), InstallError> {
        if self.policy.blocked.iter().any(|name| *name == metadata.name) {
            return Err(InstallError::Prohibited(metadata.name.clone()));
        }
        Ok(())
    }

    async fn check_signature(&self, path: &Path, signature_present: bool) -> Result<(), InstallError> {
        if !self.policy.require_signature {
            return Ok(());
        }
        if !signature_present {
            return Err(InstallError::MissingOrInvalidSignature);
        }
        match self.backend.verify_signature(path).await {
            Ok(SignatureStatus::Valid) => Ok(()),
            Ok(SignatureStatus::Missing) => Err(InstallError::MissingOrInvalidSignature),
            Ok(SignatureStatus::Invalid(detail)) => {
                debug!("Signature of {:?} is invalid: {}", path, detail);
                Err(InstallError::MissingOrInvalidSignature)
            }
            Err(err) => {
                warn!("Signature verification of {:?} failed: {:#}", path, err);
                Err(InstallError::MissingOrInvalidSignature)
            }
        }
    }

    /// Compare the space a package needs with what the target filesystem has
    /// free. Run at admission and again right before execution.
    pub fn check_disk(&self, metadata: &PackageMetadata, path: &Path) -> Result<(), InstallError> {
        let archive = self.runtime.file_size(path).unwrap_or(0);
        let required = metadata.installed_size_bytes().saturating_add(archive);

        let available = match self.runtime.available_space(&self.policy.target_root) {
            Ok(available) => available,
            Err(err) => {
                warn!(
                    "Could not read free space on {:?}, skipping the check: {:#}",
                    self.policy.target_root, err
                );
                return Ok(());
            }
        };

        if required > available {
            return Err(InstallError::InsufficientDiskSpace(Some(SpaceShortfall {
                required,
                available,
            })));
        }
        Ok(())
    }

    /// How the installed copy of this package, if any, relates to the file.
    pub async fn compare_installed(
        &self,
        metadata: &PackageMetadata,
    ) -> (Option<String>, InstalledComparison) {
        let installed = match self
            .backend
            .installed_version(&metadata.name, &metadata.architecture)
            .await
        {
            Ok(installed) => installed,
            Err(err) => {
                warn!("Could not query installed version of {}: {:#}", metadata.name, err);
                None
            }
        };

        let comparison = match &installed {
            None => InstalledComparison::NotInstalled,
            Some(version) => match compare_versions(version, &metadata.version) {
                Ordering::Less => InstalledComparison::Older,
                Ordering::Equal => InstalledComparison::Same,
                Ordering::Greater => InstalledComparison::Newer,
            },
        };
        (installed, comparison)
    }

    async fn digest(&self, path: &Path) -> anyhow::Result<String> {
        let reader = self.runtime.open(path)?;
        let digest = tokio::task::spawn_blocking(move || sha256_hex(reader)).await??;
        Ok(digest)
    }
}

fn sha256_hex<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
