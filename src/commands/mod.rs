use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;

use crate::{
    backend::AptBackend,
    config::Config,
    engine::{AdmissionPolicy, InstallQueue},
    error::QueueError,
    package::{EntryId, EntrySnapshot, EntryStatus},
    runtime::Runtime,
};

mod install;
pub mod messages;
mod remove;
mod report;

pub use install::{inspect, install, reinstall};
pub use remove::remove;

/// Settings from the command line that apply to every subcommand.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config: Option<PathBuf>,
    /// Overrides the configured architectures when not empty.
    pub architectures: Vec<String>,
    pub require_signature: bool,
    /// Answer yes to confirmation prompts.
    pub yes: bool,
    pub json: bool,
}

/// Build the admission policy from configuration and command-line overrides.
pub(crate) fn resolve_config<R: Runtime>(
    runtime: &R,
    options: &Options,
) -> Result<(Config, AdmissionPolicy)> {
    let mut config = Config::load(runtime, options.config.as_deref())?;
    if !options.architectures.is_empty() {
        config.architectures = options.architectures.clone();
    }
    if options.require_signature {
        config.require_signature = true;
    }

    let policy = AdmissionPolicy {
        architectures: config.architectures.clone(),
        require_signature: config.require_signature,
        blocked: config.blocked_names(runtime)?,
        target_root: config.target_root.clone(),
    };
    debug!("Admission policy: {:?}", policy);
    Ok((config, policy))
}

/// A queue wired to the system package manager, with its events printed as
/// they arrive.
pub(crate) struct Session<R: Runtime + 'static> {
    queue: InstallQueue<R>,
    reporter: JoinHandle<()>,
    /// Waiting entries dropped on Ctrl-C.
    withdrawn: Arc<AtomicUsize>,
    json: bool,
}

impl<R: Runtime + Clone + 'static> Session<R> {
    #[tracing::instrument(skip(runtime, options))]
    pub(crate) async fn open(runtime: R, options: &Options) -> Result<Self> {
        let (config, policy) = resolve_config(&runtime, options)?;
        let backend = Arc::new(AptBackend::new(runtime.clone(), &config));
        let queue = InstallQueue::new(Arc::new(runtime), backend, policy);

        // Nothing can be admitted without knowing what the system runs.
        let host = queue
            .host_architectures()
            .await
            .context("Cannot determine the system architecture; is dpkg available?")?;
        debug!("Accepting architectures {:?}", host);

        let reporter = report::spawn(queue.subscribe(), options.json);
        Ok(Self {
            queue,
            reporter,
            withdrawn: Arc::default(),
            json: options.json,
        })
    }
}

impl<R: Runtime + 'static> Session<R> {
    pub(crate) fn queue(&self) -> &InstallQueue<R> {
        &self.queue
    }

    /// Queue every file. Returns how many produced no entry.
    pub(crate) async fn admit(&self, files: &[PathBuf]) -> usize {
        let results = self.queue.bulk_enqueue(files).await;
        let mut rejected = 0;
        for (path, result) in files.iter().zip(results) {
            if let Err(err) = result {
                self.refused(path, &err);
                rejected += 1;
            }
        }
        rejected
    }

    /// Queue a single file, reporting it when it produced no entry.
    pub(crate) async fn admit_one(&self, file: &Path) -> Option<EntryId> {
        let result = self.queue.enqueue(file).await;
        self.admitted(file, result)
    }

    /// Queue a file whose package is to be removed.
    pub(crate) async fn admit_for_removal(&self, file: &Path) -> Option<EntryId> {
        let result = self.queue.enqueue_for_removal(file).await;
        self.admitted(file, result)
    }

    fn admitted(&self, file: &Path, result: Result<EntryId, QueueError>) -> Option<EntryId> {
        match result {
            Ok(id) => Some(id),
            Err(err) => {
                self.refused(file, &err);
                None
            }
        }
    }

    /// Report a command the queue turned down.
    pub(crate) fn refused(&self, path: &Path, err: &QueueError) {
        if self.json {
            let failure = match err {
                QueueError::Admission(reason) => serde_json::to_value(reason).ok(),
                _ => None,
            };
            let line = serde_json::json!({
                "event": "refused",
                "path": path,
                "message": messages::queue_error_text(err),
                "failure": failure,
            });
            println!("{}", line);
        } else {
            eprintln!("{}: {}", path.display(), messages::queue_error_text(err));
        }
    }

    /// Execute everything waiting. Ctrl-C withdraws what has not started and
    /// asks the package manager to stop the running operation.
    pub(crate) async fn drain(&self) {
        let queue = self.queue.clone();
        let withdrawn = Arc::clone(&self.withdrawn);
        let ctrl_c_handler = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping...");
                withdrawn.fetch_add(interrupt(&queue), Ordering::SeqCst);
            }
        });

        self.queue.run_pending().await;

        ctrl_c_handler.abort();
        // The handler holds a queue handle; wait until it is gone.
        let _ = ctrl_c_handler.await;
    }

    /// How many waiting entries were dropped by an interrupt.
    pub(crate) fn withdrawn(&self) -> usize {
        self.withdrawn.load(Ordering::SeqCst)
    }

    /// Stop reporting and return the final state of every entry.
    pub(crate) async fn close(self) -> Result<Vec<EntrySnapshot>> {
        let Session {
            queue, reporter, ..
        } = self;
        let entries = queue.snapshot();
        // The reporter ends once the last queue handle is gone.
        drop(queue);
        reporter.await.context("Event reporter stopped unexpectedly")?;
        Ok(entries)
    }

    /// Close the session and print where every entry ended up.
    pub(crate) async fn finish(self) -> Result<Vec<EntrySnapshot>> {
        let json = self.json;
        let entries = self.close().await?;
        print_summary(&entries, json)?;
        Ok(entries)
    }
}

/// Withdraw every waiting entry and ask the running one to stop. Returns
/// how many entries were withdrawn.
fn interrupt<R: Runtime + 'static>(queue: &InstallQueue<R>) -> usize {
    let withdrawn = queue
        .snapshot()
        .iter()
        .filter(|entry| entry.status == EntryStatus::Waiting)
        .filter(|entry| queue.cancel_pending(entry.id).is_ok())
        .count();
    if let Some(id) = queue.cancel_active() {
        eprintln!("Waiting for {} to stop", id);
    }
    withdrawn
}

pub(crate) fn print_summary(entries: &[EntrySnapshot], json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({ "event": "summary", "entries": entries });
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    for entry in entries {
        println!("{}", messages::outcome_line(entry));
    }
    Ok(())
}

/// A session succeeds when every entry finished without failing.
pub(crate) fn all_succeeded(entries: &[EntrySnapshot]) -> bool {
    entries
        .iter()
        .all(|e| e.status.is_terminal() && e.status != EntryStatus::Failed)
}

/// Whether every submitted file was queued, none was withdrawn and every
/// entry succeeded.
pub(crate) fn session_succeeded(rejected: usize, withdrawn: usize, entries: &[EntrySnapshot]) -> bool {
    rejected == 0 && withdrawn == 0 && all_succeeded(entries)
}
