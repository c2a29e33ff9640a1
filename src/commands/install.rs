use anyhow::{Result, bail};
use log::debug;
use std::path::{Path, PathBuf};

use super::{Options, Session, messages, print_summary, session_succeeded};
use crate::package::{EntryStatus, InstalledComparison};
use crate::runtime::Runtime;

/// Install package files in the order given.
///
/// Returns whether every file was installed.
#[tracing::instrument(skip(runtime, files, options), fields(count = files.len()))]
pub async fn install<R: Runtime + Clone + 'static>(
    runtime: R,
    files: &[PathBuf],
    options: &Options,
) -> Result<bool> {
    debug!("Installing {:?}", files);
    let session = Session::open(runtime, options).await?;

    let rejected = session.admit(files).await;
    session.drain().await;

    let withdrawn = session.withdrawn();
    let entries = session.finish().await?;
    Ok(session_succeeded(rejected, withdrawn, &entries))
}

/// Install the same version of an installed package again.
#[tracing::instrument(skip(runtime, options))]
pub async fn reinstall<R: Runtime + Clone + 'static>(
    runtime: R,
    file: &Path,
    options: &Options,
) -> Result<bool> {
    let session = Session::open(runtime, options).await?;
    let Some(id) = session.admit_one(file).await else {
        session.close().await?;
        return Ok(false);
    };

    let Some(entry) = session.queue().entry(id) else {
        bail!("Entry {} disappeared", id);
    };
    if entry.status == EntryStatus::Waiting
        && entry.installed_comparison != InstalledComparison::Same
    {
        session.close().await?;
        let installed = messages::comparison_text(
            entry.installed_comparison,
            entry.installed_version.as_deref(),
        )
        .unwrap_or_else(|| "Not installed".to_string());
        bail!(
            "Cannot reinstall {} {}: {}. Use `debi install` instead.",
            entry.name,
            entry.version,
            installed
        );
    }

    // A waiting entry whose version is already installed is reinstalled.
    session.drain().await;

    let withdrawn = session.withdrawn();
    let entries = session.finish().await?;
    Ok(session_succeeded(0, withdrawn, &entries))
}

/// Check package files against the system without installing anything.
///
/// Returns whether every file could be installed as things stand.
#[tracing::instrument(skip(runtime, files, options), fields(count = files.len()))]
pub async fn inspect<R: Runtime + Clone + 'static>(
    runtime: R,
    files: &[PathBuf],
    options: &Options,
) -> Result<bool> {
    let session = Session::open(runtime, options).await?;
    let mut ok = session.admit(files).await == 0;

    let mut lines = Vec::new();
    for entry in session.queue().snapshot() {
        if entry.status != EntryStatus::Waiting {
            ok = false;
            continue;
        }
        let text = match session.queue().inspect(entry.id).await {
            Ok(verdict) if !verdict.ok => {
                ok = false;
                format!("Broken dependencies: {}", verdict.broken.join(", "))
            }
            Ok(verdict) if verdict.pending.is_empty() => "Ready to install".to_string(),
            Ok(verdict) => messages::pending_dependencies(&verdict.pending),
            Err(err) => {
                ok = false;
                messages::queue_error_text(&err)
            }
        };
        lines.push(format!("[{}] {}: {}", entry.id, entry.name, text));
        if let Some(metadata) = session.queue().metadata(entry.id) {
            if options.json {
                let line = serde_json::json!({
                    "event": "package",
                    "id": entry.id,
                    "package": metadata,
                });
                println!("{}", line);
            } else {
                lines.extend(
                    messages::package_details(&metadata)
                        .into_iter()
                        .map(|detail| format!("    {}", detail)),
                );
            }
        }
    }

    let entries = session.close().await?;
    if options.json {
        print_summary(&entries, true)?;
    } else {
        for line in lines {
            println!("{}", line);
        }
    }
    Ok(ok)
}
