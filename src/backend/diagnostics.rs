//! Parsing of apt and dpkg text output.
//!
//! apt is run with `LANG=C`, so the phrases matched here are the untranslated
//! English ones.

use super::{FailureCategory, ProgressEvent};

const NETWORK_MARKERS: &[&str] = &[
    "temporary failure resolving",
    "could not resolve",
    "failed to fetch",
    "unable to fetch some archives",
    "network is unreachable",
    "connection timed out",
    "connection refused",
    "unable to connect to",
];

const DISK_MARKERS: &[&str] = &[
    "no space left on device",
    "you don't have enough free space",
    "not enough free space",
];

const SIGNATURE_MARKERS: &[&str] = &[
    "no_pubkey",
    "signature verification failed",
    "signatures were invalid",
    "debsig-verify",
    "bad signature",
];

const RELATION_FIELDS: &[&str] = &[
    "Depends:",
    "PreDepends:",
    "Pre-Depends:",
    "Breaks:",
    "Conflicts:",
];

/// A line of `apt-get --simulate` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedAction {
    Install(String),
    Remove(String),
}

/// Classify free-form manager output into a failure category.
pub fn classify(text: &str) -> FailureCategory {
    let lower = text.to_lowercase();

    if DISK_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureCategory::Disk;
    }
    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureCategory::Network;
    }
    if SIGNATURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureCategory::Signature;
    }

    let names = unmet_dependencies(text);
    if !names.is_empty() {
        return FailureCategory::Dependency(names);
    }
    if lower.contains("unmet dependencies") || lower.contains("dependency problems") {
        return FailureCategory::Dependency(Vec::new());
    }

    FailureCategory::Generic
}

/// Names of unmet dependencies, in the order they were reported, without
/// duplicates.
///
/// Understands apt's "The following packages have unmet dependencies" block
/// (`pkg : Depends: dep (>= 1) but it is not installable`) and dpkg's
/// `pkg depends on dep; however:` form.
pub fn unmet_dependencies(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim().trim_end_matches([';', ',', ':']);
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for line in text.lines() {
        for field in RELATION_FIELDS {
            if let Some((_, rest)) = line.split_once(field) {
                if let Some(name) = rest.split_whitespace().next() {
                    push(name);
                }
                break;
            }
        }

        if let Some((_, rest)) = line.split_once(" depends on ")
            && let Some(name) = rest.split_whitespace().next()
        {
            push(name);
        }
    }

    names
}

/// Parse the `Inst`/`Remv` lines of `apt-get --simulate` output.
pub fn simulated_actions(text: &str) -> Vec<SimulatedAction> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let verb = parts.next()?;
            let name = parts.next()?.to_string();
            match verb {
                "Inst" => Some(SimulatedAction::Install(name)),
                "Remv" => Some(SimulatedAction::Remove(name)),
                _ => None,
            }
        })
        .collect()
}

/// Parse `apt-cache rdepends --installed` output into reverse dependency names.
///
/// The first line repeats the queried package and the second is the
/// `Reverse Depends:` header; alternatives are prefixed with `|`.
pub fn reverse_dependencies(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut in_list = false;
    for line in text.lines() {
        if line.trim_start().starts_with("Reverse Depends:") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        let name = line.trim().trim_start_matches('|').trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Parse a line written to `APT::Status-Fd`.
///
/// Lines look like `pmstatus:hello:42.8571:Unpacking hello (amd64)`. The
/// message itself may contain colons.
pub fn status_line(line: &str) -> Option<ProgressEvent> {
    let mut parts = line.splitn(4, ':');
    let kind = parts.next()?;
    if !matches!(kind, "pmstatus" | "dlstatus" | "pmerror" | "pmconffile") {
        return None;
    }
    let _package = parts.next()?;
    let percent = parts.next()?.trim().parse::<f32>().ok()?;
    let message = parts.next().unwrap_or_default().trim().to_string();

    match kind {
        "pmstatus" | "dlstatus" => Some(ProgressEvent::Status { percent, message }),
        _ => Some(ProgressEvent::Output { line: message }),
    }
}

/// Strip an `:arch` qualifier from a package name.
pub fn bare_name(name: &str) -> &str {
    name.split_once(':').map(|(n, _)| n).unwrap_or(name)
}
