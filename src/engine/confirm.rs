//! Uninstall confirmation.
//!
//! Before a removal reaches the package manager the caller is shown which
//! packages go with it and how risky that is, and must confirm.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::backend::RemovalReport;
use crate::package::{EntryId, EntryStatus, PackageEntry};
use crate::runtime::Runtime;

/// Which warning accompanies an uninstall prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallRisk {
    /// Only packages that exist to serve the target are removed.
    DependenciesRemoved,
    /// Removal reaches beyond the target's own dependencies.
    SystemRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecision {
    Confirm,
    Cancel,
}

/// A pending uninstall awaiting the caller's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallPrompt {
    pub entry: EntryId,
    pub target: String,
    /// Packages removed along with the target, in manager order.
    pub affected: Vec<String>,
    pub risk: UninstallRisk,
    // The entry as it was when the prompt was built; a prompt for an entry
    // that has since changed is refused.
    #[serde(skip)]
    pub(crate) attempt: u32,
    #[serde(skip)]
    pub(crate) status: EntryStatus,
}

impl UninstallPrompt {
    /// Target first, then everything removed with it.
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(self.target.as_str())
            .chain(self.affected.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for UninstallPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Are you sure you want to uninstall {}?", self.target)?;
        match self.risk {
            UninstallRisk::DependenciesRemoved => {
                writeln!(f, "All dependencies will also be removed")?
            }
            UninstallRisk::SystemRisk => {
                writeln!(f, "System or other applications may not work properly")?
            }
        }
        write!(f, "Packages to remove: {}", self.names().join(", "))
    }
}

pub struct ConfirmationGate;

impl ConfirmationGate {
    /// Build the prompt for removing `entry`, given what the manager would
    /// remove with it.
    pub fn prompt(entry: &PackageEntry, report: &RemovalReport) -> UninstallPrompt {
        UninstallPrompt {
            entry: entry.id(),
            target: entry.name().to_string(),
            affected: report.affected.iter().map(|a| a.name.clone()).collect(),
            risk: Self::assess(entry.name(), report),
            attempt: entry.attempt(),
            status: entry.status(),
        }
    }

    /// Removal only takes the target's own dependencies when something else
    /// goes with it, none of it is essential, and nothing outside the removed
    /// set still depends on any of it.
    pub fn assess(target: &str, report: &RemovalReport) -> UninstallRisk {
        if report.target_essential || report.affected.is_empty() {
            return UninstallRisk::SystemRisk;
        }

        let removed: HashSet<&str> = std::iter::once(target)
            .chain(report.affected.iter().map(|a| a.name.as_str()))
            .collect();

        let contained = report.affected.iter().all(|package| {
            !package.essential
                && package
                    .required_by
                    .iter()
                    .all(|dependent| removed.contains(dependent.as_str()))
        });

        if contained {
            UninstallRisk::DependenciesRemoved
        } else {
            UninstallRisk::SystemRisk
        }
    }

    /// Ask the user on the terminal.
    pub fn confirm_uninstall<R: Runtime>(runtime: &R, prompt: &UninstallPrompt) -> Result<UserDecision> {
        if runtime.confirm(&prompt.to_string())? {
            Ok(UserDecision::Confirm)
        } else {
            Ok(UserDecision::Cancel)
        }
    }
}
