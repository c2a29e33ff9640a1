//! Text shown to the user for entry states and failures.

use crate::error::{InstallError, QueueError};
use crate::package::{EntrySnapshot, EntryStatus, InstalledComparison, PackageMetadata};

pub fn status_label(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::Waiting => "Waiting",
        EntryStatus::Installing => "Installing",
        EntryStatus::Installed => "Installed",
        EntryStatus::Failed => "Failed",
        EntryStatus::Uninstalling => "Uninstalling",
        EntryStatus::Removed => "Uninstalled",
    }
}

pub fn failure_text(error: &InstallError) -> String {
    match error {
        InstallError::AlreadyAdded => "Already Added".to_string(),
        InstallError::Corrupt(_) => "The deb package may be broken".to_string(),
        InstallError::ArchitectureMismatch { .. } => "Unmatched package architecture".to_string(),
        InstallError::Prohibited(_) => {
            "The administrator has set policies to prevent installation of this package"
                .to_string()
        }
        InstallError::MissingOrInvalidSignature => {
            "Unable to install: this package does not have a valid digital signature".to_string()
        }
        InstallError::InsufficientDiskSpace(_) => {
            "Installation failed, insufficient disk space".to_string()
        }
        InstallError::BrokenDependencies(names) => {
            format!("Broken dependencies: {}", names.join(", "))
        }
        InstallError::NetworkFailure(_) => {
            "Installation failed, please check your network connection".to_string()
        }
        InstallError::InstallFailure(_) => "Installation Failed".to_string(),
        InstallError::UninstallFailure(_) => "Uninstall Failed".to_string(),
    }
}

/// Failure text plus whatever detail the error carries, for verbose output.
pub fn failure_detail(error: &InstallError) -> Option<String> {
    match error {
        InstallError::Corrupt(detail)
        | InstallError::NetworkFailure(detail)
        | InstallError::InstallFailure(detail)
        | InstallError::UninstallFailure(detail) => Some(detail.clone()),
        InstallError::ArchitectureMismatch { package, host } => {
            Some(format!("package is {}, system accepts {}", package, host))
        }
        InstallError::Prohibited(name) => Some(format!("{} is blocked", name)),
        InstallError::InsufficientDiskSpace(Some(shortfall)) => Some(shortfall.to_string()),
        _ => None,
    }
}

pub fn comparison_text(comparison: InstalledComparison, installed: Option<&str>) -> Option<String> {
    let installed = installed.unwrap_or_default();
    match comparison {
        InstalledComparison::NotInstalled => None,
        InstalledComparison::Same => Some("Same version installed".to_string()),
        InstalledComparison::Older => Some(format!("Earlier version installed: {}", installed)),
        InstalledComparison::Newer => Some(format!("Later version installed: {}", installed)),
    }
}

pub fn pending_dependencies(names: &[String]) -> String {
    format!("Installing dependencies: {}", names.join(", "))
}

/// One-line summary of where an entry ended up.
pub fn outcome_line(entry: &EntrySnapshot) -> String {
    let text = match (&entry.failure_reason, entry.status) {
        (Some(reason), _) => failure_text(reason),
        (None, EntryStatus::Installed) => "Installed successfully".to_string(),
        (None, EntryStatus::Removed) => "Uninstalled successfully".to_string(),
        (None, status) => status_label(status).to_string(),
    };
    format!("{} {} ({}): {}", entry.name, entry.version, entry.architecture, text)
}

/// Text for a command the queue refused.
pub fn queue_error_text(error: &QueueError) -> String {
    match error {
        QueueError::Admission(reason) => failure_text(reason),
        QueueError::NotInstalled(_) => "The package is not installed".to_string(),
        other => other.to_string(),
    }
}

/// Control fields shown when inspecting a package.
pub fn package_details(metadata: &PackageMetadata) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(description) = &metadata.description {
        lines.push(format!("Description: {}", description));
    }
    if let Some(maintainer) = &metadata.maintainer {
        lines.push(format!("Maintainer: {}", maintainer));
    }
    if !metadata.depends.is_empty() {
        lines.push(format!("Depends: {}", metadata.depends.join(", ")));
    }
    if !metadata.conflicts.is_empty() {
        lines.push(format!("Conflicts: {}", metadata.conflicts.join(", ")));
    }
    if let Some(multi_arch) = &metadata.multi_arch {
        lines.push(format!("Multi-Arch: {}", multi_arch));
    }
    lines
}
