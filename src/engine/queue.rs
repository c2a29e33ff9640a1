//! The install queue.
//!
//! Entries are kept in admission order and executed one at a time. The queue
//! is a cheap handle: clones share the same entries, so one task can drain
//! the queue while others keep adding packages or issuing commands.
//!
//! Two locks are involved. `state` is a short-lived synchronous lock around
//! the entries and is never held across an await. `lane` is held for the
//! whole of an execution, from the pre-execution checks until the result is
//! recorded, which keeps at most one entry installing or uninstalling.

use futures_util::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};

use super::confirm::{ConfirmationGate, UninstallPrompt, UserDecision};
use super::events::QueueEvent;
use super::executor::{ExecutionRequest, OperationExecutor};
use super::inspector::DependencyInspector;
use super::validator::{Admission, AdmissionPolicy, AdmittedPackage, KnownPackages, Validator};
use crate::backend::{PackageBackend, ProgressEvent};
use crate::error::{InstallError, QueueError};
use crate::package::{
    DependencyVerdict, EntryId, EntrySnapshot, EntryState, EntryStatus, InstalledComparison,
    Operation, PackageEntry, PackageMetadata,
};
use crate::runtime::Runtime;

const EVENT_CAPACITY: usize = 256;

struct ActiveSlot {
    id: EntryId,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<PackageEntry>,
    next_id: u64,
    active: Option<ActiveSlot>,
}

impl QueueState {
    fn position(&self, id: EntryId) -> Result<usize, QueueError> {
        self.entries
            .iter()
            .position(|e| e.id() == id)
            .ok_or(QueueError::UnknownEntry(id))
    }

    fn get(&self, id: EntryId) -> Result<&PackageEntry, QueueError> {
        let index = self.position(id)?;
        Ok(&self.entries[index])
    }

    fn get_mut(&mut self, id: EntryId) -> Result<&mut PackageEntry, QueueError> {
        let index = self.position(id)?;
        Ok(&mut self.entries[index])
    }

    fn known(&self, except: Option<EntryId>) -> KnownPackages {
        let mut known = KnownPackages::default();
        for entry in self.entries.iter().filter(|e| Some(e.id()) != except) {
            known.insert(entry.path(), entry.digest());
        }
        known
    }
}

struct Shared<R: Runtime> {
    state: Mutex<QueueState>,
    lane: tokio::sync::Mutex<()>,
    validator: Validator<R>,
    inspector: DependencyInspector,
    executor: OperationExecutor,
    events: broadcast::Sender<QueueEvent>,
}

pub struct InstallQueue<R: Runtime> {
    shared: Arc<Shared<R>>,
}

impl<R: Runtime> Clone for InstallQueue<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Runtime + 'static> InstallQueue<R> {
    pub fn new(runtime: Arc<R>, backend: Arc<dyn PackageBackend>, policy: AdmissionPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                lane: tokio::sync::Mutex::new(()),
                validator: Validator::new(runtime, Arc::clone(&backend), policy),
                inspector: DependencyInspector::new(Arc::clone(&backend)),
                executor: OperationExecutor::new(backend),
                events,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.lock().entries.iter().map(PackageEntry::snapshot).collect()
    }

    pub fn entry(&self, id: EntryId) -> Option<EntrySnapshot> {
        self.lock().get(id).ok().map(PackageEntry::snapshot)
    }

    /// Control metadata of an entry's package file.
    pub fn metadata(&self, id: EntryId) -> Option<PackageMetadata> {
        self.lock().get(id).ok().map(|e| e.metadata().clone())
    }

    /// Architectures this queue admits. Fails when the package manager
    /// cannot be reached.
    pub async fn host_architectures(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.shared.validator.host_architectures().await?.to_vec())
    }

    /// Admit one package file.
    ///
    /// Files that are duplicates or unreadable produce no entry and return
    /// `Err`. A readable file that fails a later check is recorded as a
    /// failed entry and its id returned.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(&self, path: &Path) -> Result<EntryId, QueueError> {
        let known = self.lock().known(None);
        let admission = self.shared.validator.admit(path, &known).await?;
        self.record(admission, true)
    }

    /// Admit a file only so the package it names can be removed.
    ///
    /// The install checks are skipped, so a package that could not be
    /// installed today can still be removed. Should the entry be installed
    /// later, those checks run first.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue_for_removal(&self, path: &Path) -> Result<EntryId, QueueError> {
        let known = self.lock().known(None);
        let package = self.shared.validator.admit_for_removal(path, &known).await?;
        self.record(Admission::Accepted(package), false)
    }

    /// Admit several files at once. Admissions run concurrently and do not
    /// affect each other; entries are recorded, and later executed, in the
    /// order of `paths`.
    #[tracing::instrument(skip(self, paths), fields(count = paths.len()))]
    pub async fn bulk_enqueue(&self, paths: &[PathBuf]) -> Vec<Result<EntryId, QueueError>> {
        let known = self.lock().known(None);
        let admissions = join_all(
            paths
                .iter()
                .map(|path| self.shared.validator.admit(path, &known)),
        )
        .await;

        admissions
            .into_iter()
            .map(|admission| -> Result<EntryId, QueueError> { self.record(admission?, true) })
            .collect()
    }

    fn record(&self, admission: Admission, screened: bool) -> Result<EntryId, QueueError> {
        let mut state = self.lock();

        // Two concurrent admissions of the same file both pass the validator.
        let package = admission.package();
        if state.known(None).contains(&package.path, &package.digest) {
            return Err(InstallError::AlreadyAdded.into());
        }

        state.next_id += 1;
        let mut entry = build_entry(EntryId(state.next_id), admission);
        entry.set_unscreened(!screened);
        let id = entry.id();
        let snapshot = entry.snapshot();
        state.entries.push(entry);
        drop(state);

        info!(
            "Queued {} {} ({}) as {}: {}",
            snapshot.name, snapshot.version, snapshot.architecture, id, snapshot.status
        );
        self.emit(QueueEvent::Admitted { entry: snapshot });
        Ok(id)
    }

    /// Withdraw a waiting entry. Nothing on the system is touched.
    pub fn cancel_pending(&self, id: EntryId) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = state.position(id)?;
        if state.entries[index].status() != EntryStatus::Waiting {
            return Err(QueueError::NotWaiting(id));
        }
        state.entries.remove(index);
        drop(state);

        debug!("Withdrew {}", id);
        self.emit(QueueEvent::Withdrawn { id });
        Ok(())
    }

    /// Drop a finished entry from the queue.
    pub fn dismiss(&self, id: EntryId) -> Result<(), QueueError> {
        let mut state = self.lock();
        let index = state.position(id)?;
        if !state.entries[index].status().is_terminal() {
            return Err(QueueError::Busy(id));
        }
        state.entries.remove(index);
        drop(state);

        self.emit(QueueEvent::Withdrawn { id });
        Ok(())
    }

    /// Give a failed entry a fresh attempt, starting again from admission.
    ///
    /// The entry keeps its id and position and goes back to waiting. The
    /// admission checks run again when its turn comes; a rejection then is
    /// recorded as a failed install.
    #[tracing::instrument(skip(self))]
    pub fn retry(&self, id: EntryId) -> Result<(), QueueError> {
        let mut state = self.lock();
        let entry = state.get_mut(id)?;
        if entry.status() != EntryStatus::Failed {
            return Err(QueueError::NotRetryable(id));
        }

        let fresh = PackageEntry::new(
            id,
            entry.path().to_path_buf(),
            entry.digest().to_string(),
            entry.metadata().clone(),
            EntryState::Waiting,
        );
        let mut retried = entry.clone().into_retry(fresh);
        retried.installed_comparison = entry.installed_comparison;
        retried.installed_version = entry.installed_version.clone();
        retried.set_unscreened(true);
        *entry = retried;
        let snapshot = entry.snapshot();
        drop(state);

        info!("Retrying {} (attempt {})", id, snapshot.attempt);
        self.emit(QueueEvent::StatusChanged {
            from: EntryStatus::Failed,
            entry: snapshot,
        });
        Ok(())
    }

    /// Ask the package manager about an entry's dependencies without
    /// changing its state. The verdict is kept on the entry.
    #[tracing::instrument(skip(self))]
    pub async fn inspect(&self, id: EntryId) -> Result<DependencyVerdict, QueueError> {
        let entry = self.lock().get(id)?.clone();
        let verdict = self
            .shared
            .inspector
            .inspect(&entry)
            .await
            .map_err(QueueError::Inspection)?;
        let summary = verdict.clone();
        self.update(id, |e| e.dependency_summary = Some(summary))?;
        Ok(verdict)
    }

    /// Execute every waiting entry, in queue order, until none is left.
    pub async fn run_pending(&self) {
        let mut attempted: HashSet<(EntryId, u32)> = HashSet::new();
        loop {
            let next = self
                .lock()
                .entries
                .iter()
                .find(|e| {
                    e.status() == EntryStatus::Waiting && !attempted.contains(&(e.id(), e.attempt()))
                })
                .map(|e| (e.id(), e.attempt()));
            let Some(key) = next else {
                break;
            };
            attempted.insert(key);

            if let Err(err) = self.install(key.0).await {
                debug!("Skipped {}: {}", key.0, err);
            }
        }
    }

    /// Install one waiting entry. Reinstalls when the same version is
    /// already on the system.
    pub async fn install(&self, id: EntryId) -> Result<(), QueueError> {
        self.run_install(id, Operation::Install).await
    }

    /// Install an installed entry's package again.
    pub async fn reinstall(&self, id: EntryId) -> Result<(), QueueError> {
        self.run_install(id, Operation::Reinstall).await
    }

    #[tracing::instrument(skip(self))]
    async fn run_install(&self, id: EntryId, requested: Operation) -> Result<(), QueueError> {
        let _lane = self.shared.lane.lock().await;

        let mut entry = self.lock().get(id)?.clone();
        let expected = match requested {
            Operation::Install => EntryStatus::Waiting,
            _ => EntryStatus::Installed,
        };
        if entry.status() != expected {
            return Err(match requested {
                Operation::Install => QueueError::NotWaiting(id),
                _ => QueueError::InvalidTransition {
                    id,
                    from: entry.status(),
                    to: EntryStatus::Installing,
                },
            });
        }

        if entry.is_unscreened() {
            if let Some(reason) = self.readmit(id, entry.path()).await? {
                return self.fail_before_execution(id, reason);
            }
            entry = self.lock().get(id)?.clone();
        }

        // The system may have changed since admission.
        let (installed_version, comparison) =
            self.shared.validator.compare_installed(entry.metadata()).await;
        self.update(id, |e| {
            e.installed_version = installed_version;
            e.installed_comparison = comparison;
        })?;

        let verdict = match self.shared.inspector.inspect(&entry).await {
            Ok(verdict) => verdict,
            Err(err) => return self.fail_before_execution(id, err),
        };
        let summary = verdict.clone();
        self.update(id, |e| e.dependency_summary = Some(summary))?;
        if !verdict.ok {
            return self.fail_before_execution(id, InstallError::BrokenDependencies(verdict.broken));
        }

        let cancel = self.begin(id, EntryState::Installing)?;
        if !verdict.pending.is_empty() {
            self.emit(QueueEvent::Progress {
                id,
                progress: ProgressEvent::DependenciesPending {
                    names: verdict.pending,
                },
            });
        }

        if let Err(err) = self
            .shared
            .validator
            .check_disk(entry.metadata(), entry.path())
        {
            return self.finish(id, Err(err), requested);
        }

        let operation = if requested == Operation::Install && comparison == InstalledComparison::Same {
            Operation::Reinstall
        } else {
            requested
        };
        let result = self.execute(id, operation, &entry, cancel).await;
        self.finish(id, result, operation)
    }

    /// Work out what removing an entry's package involves.
    ///
    /// The entry must be installed, or waiting with some version of its
    /// package already on the system. Nothing changes until the prompt is
    /// resolved.
    #[tracing::instrument(skip(self))]
    pub async fn request_uninstall(&self, id: EntryId) -> Result<UninstallPrompt, QueueError> {
        let entry = self.lock().get(id)?.clone();
        check_uninstallable(&entry)?;

        let report = self
            .shared
            .inspector
            .inspect_removal(&entry)
            .await
            .map_err(QueueError::RemovalPlanning)?;
        Ok(ConfirmationGate::prompt(&entry, &report))
    }

    /// Act on the caller's answer to an uninstall prompt. `Cancel` leaves the
    /// entry as it was.
    #[tracing::instrument(skip(self, prompt), fields(entry = %prompt.entry))]
    pub async fn resolve_uninstall(
        &self,
        prompt: &UninstallPrompt,
        decision: UserDecision,
    ) -> Result<(), QueueError> {
        let id = prompt.entry;
        if decision == UserDecision::Cancel {
            info!("Uninstall of {} cancelled", prompt.target);
            return Ok(());
        }

        let _lane = self.shared.lane.lock().await;

        let entry = self.lock().get(id)?.clone();
        if entry.attempt() != prompt.attempt || entry.status() != prompt.status {
            return Err(QueueError::StalePrompt(id));
        }
        check_uninstallable(&entry)?;

        let cancel = self.begin(id, EntryState::Uninstalling)?;
        let result = self.execute(id, Operation::Uninstall, &entry, cancel).await;
        self.finish(id, result, Operation::Uninstall)
    }

    /// Ask the package manager to stop the running operation.
    ///
    /// The entry's final state still follows how the manager actually exits.
    pub fn cancel_active(&self) -> Option<EntryId> {
        let state = self.lock();
        let active = state.active.as_ref()?;
        info!("Requesting cancellation of {}", active.id);
        active.cancel.send_replace(true);
        Some(active.id)
    }

    fn update(&self, id: EntryId, f: impl FnOnce(&mut PackageEntry)) -> Result<(), QueueError> {
        let mut state = self.lock();
        f(state.get_mut(id)?);
        Ok(())
    }

    fn transition(&self, id: EntryId, next: EntryState) -> Result<(), QueueError> {
        let mut state = self.lock();
        let entry = state.get_mut(id)?;
        let from = entry.transition(next)?;
        let snapshot = entry.snapshot();
        drop(state);

        self.emit(QueueEvent::StatusChanged {
            from,
            entry: snapshot,
        });
        Ok(())
    }

    /// Run the admission checks again for an entry that has not passed them
    /// in its current attempt. Returns the rejection, if any.
    async fn readmit(&self, id: EntryId, path: &Path) -> Result<Option<InstallError>, QueueError> {
        let known = self.lock().known(Some(id));
        let (package, rejection) = match self.shared.validator.admit(path, &known).await {
            Ok(Admission::Accepted(package)) => (package, None),
            Ok(Admission::Rejected(package, reason)) => (package, Some(reason)),
            Err(err) => return Ok(Some(err)),
        };

        let AdmittedPackage {
            path,
            digest,
            metadata,
            installed_comparison,
            installed_version,
        } = package;
        self.update(id, |e| {
            e.reload(path, digest, metadata);
            e.installed_comparison = installed_comparison;
            e.installed_version = installed_version;
            e.set_unscreened(false);
        })?;
        Ok(rejection)
    }

    /// Record a failure found before the manager was involved.
    fn fail_before_execution(&self, id: EntryId, err: InstallError) -> Result<(), QueueError> {
        warn!("{} failed before execution: {}", id, err);
        let entry = self.lock().get(id)?.clone();
        // Reinstalls and retries only fail by way of Installing.
        if entry.status() == EntryStatus::Installed || entry.attempt() > 1 {
            self.transition(id, EntryState::Installing)?;
        }
        self.transition(id, EntryState::Failed(err))
    }

    /// Make `id` the active entry. Only one entry may be active at a time.
    fn begin(&self, id: EntryId, next: EntryState) -> Result<watch::Receiver<bool>, QueueError> {
        let mut state = self.lock();
        if let Some(active) = &state.active {
            return Err(QueueError::Busy(active.id));
        }

        let entry = state.get_mut(id)?;
        let from = entry.transition(next)?;
        let snapshot = entry.snapshot();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        state.active = Some(ActiveSlot {
            id,
            cancel: cancel_tx,
        });
        drop(state);

        self.emit(QueueEvent::StatusChanged {
            from,
            entry: snapshot,
        });
        Ok(cancel_rx)
    }

    /// Record the result of an execution and release the active slot.
    fn finish(
        &self,
        id: EntryId,
        result: Result<(), InstallError>,
        operation: Operation,
    ) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|a| a.id == id) {
            state.active = None;
        }

        let entry = state.get_mut(id)?;
        let next = match result {
            Ok(()) if operation == Operation::Uninstall => EntryState::Removed,
            Ok(()) => EntryState::Installed,
            Err(err) => EntryState::Failed(err),
        };
        let from = entry.transition(next)?;
        match entry.status() {
            EntryStatus::Installed => {
                entry.installed_comparison = InstalledComparison::Same;
                entry.installed_version = Some(entry.version().to_string());
            }
            EntryStatus::Removed => {
                entry.installed_comparison = InstalledComparison::NotInstalled;
                entry.installed_version = None;
            }
            _ => {}
        }
        let snapshot = entry.snapshot();
        drop(state);

        match &snapshot.failure_reason {
            Some(reason) => warn!("{} {} failed: {}", operation, snapshot.name, reason),
            None => info!("{} {}: {}", operation, snapshot.name, snapshot.status),
        }
        self.emit(QueueEvent::StatusChanged {
            from,
            entry: snapshot,
        });
        Ok(())
    }

    /// Run an operation through the executor, republishing its progress.
    async fn execute(
        &self,
        id: EntryId,
        operation: Operation,
        entry: &PackageEntry,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), InstallError> {
        let request = ExecutionRequest {
            entry: id,
            operation,
            path: entry.path().to_path_buf(),
            package: entry.metadata().qualified_name(),
            cancel,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = self.shared.events.clone();
        let forward = async move {
            while let Some(progress) = rx.recv().await {
                let _ = events.send(QueueEvent::Progress { id, progress });
            }
        };

        let (result, ()) = tokio::join!(self.shared.executor.execute(request, tx), forward);
        result
    }
}

fn build_entry(id: EntryId, admission: Admission) -> PackageEntry {
    let (package, state) = match admission {
        Admission::Accepted(package) => (package, EntryState::Waiting),
        Admission::Rejected(package, reason) => (package, EntryState::Failed(reason)),
    };
    let AdmittedPackage {
        path,
        digest,
        metadata,
        installed_comparison,
        installed_version,
    } = package;

    let mut entry = PackageEntry::new(id, path, digest, metadata, state);
    entry.installed_comparison = installed_comparison;
    entry.installed_version = installed_version;
    entry
}

fn check_uninstallable(entry: &PackageEntry) -> Result<(), QueueError> {
    match entry.status() {
        EntryStatus::Installed => Ok(()),
        EntryStatus::Waiting if entry.is_present_on_system() => Ok(()),
        status if status.is_active() => Err(QueueError::Busy(entry.id())),
        _ => Err(QueueError::NotInstalled(entry.id())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AffectedPackage, DependencyReport, FailureCategory, ManagerOutcome, ManagerRequest,
        MockPackageBackend, PackageQuery, RemovalReport, SignatureStatus,
    };
    use crate::engine::confirm::UninstallRisk;
    use crate::engine::testing::{Fixture, deb};
    use crate::runtime::MockRuntime;
    use async_trait::async_trait;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Queue = InstallQueue<MockRuntime>;

    fn queue(fixture: &Fixture, backend: MockPackageBackend) -> Queue {
        InstallQueue::new(
            Arc::new(fixture.runtime()),
            Arc::new(backend),
            AdmissionPolicy::default(),
        )
    }

    fn satisfied(backend: &mut MockPackageBackend) {
        backend
            .expect_compute_dependencies()
            .returning(|_| Ok(DependencyReport::default()));
    }

    /// Record the operation and package of every manager run.
    fn recording_runs(
        backend: &mut MockPackageBackend,
    ) -> Arc<Mutex<Vec<(Operation, String)>>> {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let seen = runs.clone();
        backend.expect_run().returning(move |req: ManagerRequest, progress, _| {
            let _ = progress.send(ProgressEvent::Status {
                percent: 100.0,
                message: format!("{} done", req.package),
            });
            seen.lock().unwrap().push((req.operation, req.package));
            Ok(ManagerOutcome::Succeeded)
        });
        runs
    }

    fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// `(from, to)` for every status change of `id`.
    fn transitions(events: &[QueueEvent], id: EntryId) -> Vec<(EntryStatus, EntryStatus)> {
        events
            .iter()
            .filter_map(|event| match event {
                QueueEvent::StatusChanged { from, entry } if entry.id == id => {
                    Some((*from, entry.status))
                }
                _ => None,
            })
            .collect()
    }

    fn assert_failure_reason_iff_failed(queue: &Queue) {
        for entry in queue.snapshot() {
            assert_eq!(
                entry.failure_reason.is_some(),
                entry.status == EntryStatus::Failed,
                "{:?}",
                entry
            );
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_install_matching_package() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let runs = recording_runs(&mut backend);
        let queue = queue(&fixture, backend);
        let mut rx = queue.subscribe();

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Waiting);

        queue.run_pending().await;

        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Installed);
        assert_eq!(entry.installed_comparison, InstalledComparison::Same);
        assert_eq!(entry.installed_version.as_deref(), Some("1.0"));
        assert_eq!(
            *runs.lock().unwrap(),
            vec![(Operation::Install, "a:amd64".to_string())]
        );

        let events = drain(&mut rx);
        assert!(matches!(events[0], QueueEvent::Admitted { .. }));
        assert_eq!(
            transitions(&events, id),
            vec![
                (EntryStatus::Waiting, EntryStatus::Installing),
                (EntryStatus::Installing, EntryStatus::Installed),
            ]
        );
        assert!(events.iter().any(|e| matches!(
            e,
            QueueEvent::Progress { id: pid, progress: ProgressEvent::Status { .. } } if *pid == id
        )));
    }

    #[tokio::test]
    async fn test_architecture_mismatch_fails_without_execution() {
        let fixture = Fixture::new().with("/pkgs/b.deb", deb("b", "1.0", "armhf"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().never();
        backend.expect_run().never();
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/b.deb")).await.unwrap();
        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(matches!(
            entry.failure_reason,
            Some(InstallError::ArchitectureMismatch { ref package, .. }) if package == "armhf"
        ));

        queue.run_pending().await;
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Failed);
    }

    #[tokio::test]
    async fn test_same_version_is_reinstalled() {
        let fixture = Fixture::new()
            .with("/pkgs/c.deb", deb("c", "2.0-1", "amd64"))
            .installed("c", "2.0-1");
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let runs = recording_runs(&mut backend);
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/c.deb")).await.unwrap();
        assert_eq!(
            queue.entry(id).unwrap().installed_comparison,
            InstalledComparison::Same
        );

        queue.run_pending().await;
        queue.reinstall(id).await.unwrap();

        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Installed);
        assert_eq!(entry.installed_comparison, InstalledComparison::Same);
        assert_eq!(
            *runs.lock().unwrap(),
            vec![
                (Operation::Reinstall, "c:amd64".to_string()),
                (Operation::Reinstall, "c:amd64".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reinstall_requires_installed_entry() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_run().never();
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        assert!(matches!(
            queue.reinstall(id).await,
            Err(QueueError::InvalidTransition {
                from: EntryStatus::Waiting,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_uninstall_prompt_lists_dependents() {
        let fixture = Fixture::new().with("/pkgs/d.deb", deb("d", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let runs = recording_runs(&mut backend);
        backend
            .expect_compute_removal()
            .with(mockall::predicate::eq("d:amd64"))
            .returning(|_| {
                Ok(RemovalReport {
                    target_essential: false,
                    affected: vec![
                        AffectedPackage {
                            name: "e".into(),
                            required_by: vec!["d".into()],
                            essential: false,
                        },
                        AffectedPackage {
                            name: "f".into(),
                            required_by: vec!["d".into()],
                            essential: false,
                        },
                    ],
                })
            });
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/d.deb")).await.unwrap();
        queue.run_pending().await;

        let prompt = queue.request_uninstall(id).await.unwrap();
        assert_eq!(prompt.risk, UninstallRisk::DependenciesRemoved);
        assert_eq!(prompt.names(), vec!["d", "e", "f"]);
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Installed);

        queue
            .resolve_uninstall(&prompt, UserDecision::Confirm)
            .await
            .unwrap();
        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Removed);
        assert_eq!(entry.installed_comparison, InstalledComparison::NotInstalled);
        assert_eq!(
            runs.lock().unwrap().last(),
            Some(&(Operation::Uninstall, "d:amd64".to_string()))
        );

        // The same prompt cannot be used twice.
        assert_eq!(
            queue.resolve_uninstall(&prompt, UserDecision::Confirm).await,
            Err(QueueError::StalePrompt(id))
        );
    }

    #[tokio::test]
    async fn test_cancelled_uninstall_changes_nothing() {
        let fixture = Fixture::new().with("/pkgs/d.deb", deb("d", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let runs = recording_runs(&mut backend);
        backend
            .expect_compute_removal()
            .returning(|_| Ok(RemovalReport::default()));
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/d.deb")).await.unwrap();
        queue.run_pending().await;
        let mut rx = queue.subscribe();

        let prompt = queue.request_uninstall(id).await.unwrap();
        assert_eq!(prompt.risk, UninstallRisk::SystemRisk);
        queue
            .resolve_uninstall(&prompt, UserDecision::Cancel)
            .await
            .unwrap();

        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Installed);
        assert_eq!(runs.lock().unwrap().len(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_uninstall_of_waiting_entry_already_on_system() {
        let fixture = Fixture::new()
            .with("/pkgs/c.deb", deb("c", "2.0", "amd64"))
            .installed("c", "1.5");
        let mut backend = fixture.backend(&["amd64"]);
        let runs = recording_runs(&mut backend);
        backend
            .expect_compute_removal()
            .returning(|_| Ok(RemovalReport::default()));
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/c.deb")).await.unwrap();
        assert_eq!(
            queue.entry(id).unwrap().installed_comparison,
            InstalledComparison::Older
        );
        let prompt = queue.request_uninstall(id).await.unwrap();
        queue
            .resolve_uninstall(&prompt, UserDecision::Confirm)
            .await
            .unwrap();

        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Removed);
        assert_eq!(
            *runs.lock().unwrap(),
            vec![(Operation::Uninstall, "c:amd64".to_string())]
        );
    }

    #[tokio::test]
    async fn test_removal_ignores_install_checks() {
        let fixture = Fixture::new()
            .with("/pkgs/c.deb", deb("c", "1.0", "amd64"))
            .installed("c", "1.0")
            .with_free_space(10);
        let mut backend = fixture.backend(&["amd64"]);
        let runs = recording_runs(&mut backend);
        backend
            .expect_compute_removal()
            .returning(|_| Ok(RemovalReport::default()));
        let queue = queue(&fixture, backend);

        let id = queue
            .enqueue_for_removal(Path::new("/pkgs/c.deb"))
            .await
            .unwrap();
        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Waiting);
        assert_eq!(entry.installed_comparison, InstalledComparison::Same);

        let prompt = queue.request_uninstall(id).await.unwrap();
        queue
            .resolve_uninstall(&prompt, UserDecision::Confirm)
            .await
            .unwrap();

        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Removed);
        assert_eq!(
            *runs.lock().unwrap(),
            vec![(Operation::Uninstall, "c:amd64".to_string())]
        );
    }

    #[tokio::test]
    async fn test_removal_entry_is_checked_before_install() {
        let fixture = Fixture::new()
            .with("/pkgs/c.deb", deb("c", "1.0", "amd64"))
            .with_free_space(10);
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().never();
        backend.expect_run().never();
        let queue = queue(&fixture, backend);

        let id = queue
            .enqueue_for_removal(Path::new("/pkgs/c.deb"))
            .await
            .unwrap();
        assert_eq!(
            queue.request_uninstall(id).await,
            Err(QueueError::NotInstalled(id))
        );

        queue.run_pending().await;
        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(matches!(
            entry.failure_reason,
            Some(InstallError::InsufficientDiskSpace(_))
        ));
    }

    #[tokio::test]
    async fn test_uninstall_requires_package_on_system() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_removal().never();
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        assert_eq!(
            queue.request_uninstall(id).await,
            Err(QueueError::NotInstalled(id))
        );
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_leaves_first_entry_alone() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        recording_runs(&mut backend);
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;
        let before = queue.entry(id).unwrap();

        assert_eq!(
            queue.enqueue(Path::new("/pkgs/a.deb")).await,
            Err(QueueError::Admission(InstallError::AlreadyAdded))
        );
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.entry(id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_bulk_enqueue_admits_independently_and_runs_in_order() {
        let fixture = Fixture::new()
            .with("/pkgs/a.deb", deb("a", "1.0", "amd64"))
            .with("/pkgs/b.deb", deb("b", "1.0", "armhf"))
            .with("/pkgs/junk.deb", b"junk".to_vec())
            .with("/pkgs/c.deb", deb("c", "1.0", "all"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let runs = recording_runs(&mut backend);
        let queue = queue(&fixture, backend);

        let paths: Vec<PathBuf> = [
            "/pkgs/a.deb",
            "/pkgs/b.deb",
            "/pkgs/junk.deb",
            "/pkgs/c.deb",
            "/pkgs/a.deb",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        let results = queue.bulk_enqueue(&paths).await;

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(QueueError::Admission(InstallError::Corrupt(_)))
        ));
        assert!(results[3].is_ok());
        assert_eq!(
            results[4],
            Err(QueueError::Admission(InstallError::AlreadyAdded))
        );

        let names: Vec<_> = queue.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        queue.run_pending().await;
        assert_eq!(
            *runs.lock().unwrap(),
            vec![
                (Operation::Install, "a:amd64".to_string()),
                (Operation::Install, "c:all".to_string()),
            ]
        );
        assert_failure_reason_iff_failed(&queue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_active_entry() {
        let fixture = Fixture::new()
            .with("/pkgs/a.deb", deb("a", "1.0", "amd64"))
            .with("/pkgs/b.deb", deb("b", "1.0", "amd64"))
            .with("/pkgs/c.deb", deb("c", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);

        let handle: Arc<OnceLock<Queue>> = Arc::new(OnceLock::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (seen_handle, seen_runs) = (handle.clone(), runs.clone());
        backend.expect_run().returning(move |_, _, _| {
            let queue = seen_handle.get().unwrap();
            let active = queue
                .snapshot()
                .iter()
                .filter(|e| e.status.is_active())
                .count();
            assert_eq!(active, 1);
            seen_runs.fetch_add(1, Ordering::SeqCst);
            Ok(ManagerOutcome::Succeeded)
        });
        let queue = queue(&fixture, backend);
        let _ = handle.set(queue.clone());

        let paths: Vec<PathBuf> = ["/pkgs/a.deb", "/pkgs/b.deb", "/pkgs/c.deb"]
            .iter()
            .map(PathBuf::from)
            .collect();
        queue.bulk_enqueue(&paths).await;

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run_pending().await }
        });
        let second = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run_pending().await }
        });
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(queue
            .snapshot()
            .iter()
            .all(|e| e.status == EntryStatus::Installed));
    }

    #[tokio::test]
    async fn test_retry_goes_back_through_waiting() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        backend.expect_run().returning(move |_, _, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ManagerOutcome::Failed {
                    category: FailureCategory::Network,
                    diagnostic: "Temporary failure resolving 'deb.debian.org'".into(),
                })
            } else {
                Ok(ManagerOutcome::Succeeded)
            }
        });
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;
        let failed = queue.entry(id).unwrap();
        assert!(matches!(
            failed.failure_reason,
            Some(InstallError::NetworkFailure(_))
        ));
        assert_failure_reason_iff_failed(&queue);

        let mut rx = queue.subscribe();
        queue.retry(id).unwrap();
        let retried = queue.entry(id).unwrap();
        assert_eq!(retried.status, EntryStatus::Waiting);
        assert_eq!(retried.attempt, 2);
        assert!(retried.failure_reason.is_none());

        queue.run_pending().await;
        assert_eq!(
            transitions(&drain(&mut rx), id),
            vec![
                (EntryStatus::Failed, EntryStatus::Waiting),
                (EntryStatus::Waiting, EntryStatus::Installing),
                (EntryStatus::Installing, EntryStatus::Installed),
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_rejected_again_fails_by_way_of_installing() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        backend.expect_run().returning(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(ManagerOutcome::Failed {
                category: FailureCategory::Network,
                diagnostic: "Could not resolve 'deb.debian.org'".into(),
            })
        });
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Failed);

        fixture.set_free_space(10);
        let mut rx = queue.subscribe();
        queue.retry(id).unwrap();
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Waiting);

        queue.run_pending().await;
        assert_eq!(
            transitions(&drain(&mut rx), id),
            vec![
                (EntryStatus::Failed, EntryStatus::Waiting),
                (EntryStatus::Waiting, EntryStatus::Installing),
                (EntryStatus::Installing, EntryStatus::Failed),
            ]
        );
        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.attempt, 2);
        assert!(matches!(
            entry.failure_reason,
            Some(InstallError::InsufficientDiskSpace(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_failure_reason_iff_failed(&queue);
    }

    #[tokio::test]
    async fn test_retry_only_from_failed() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let queue = queue(&fixture, fixture.backend(&["amd64"]));
        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        assert_eq!(queue.retry(id), Err(QueueError::NotRetryable(id)));
        assert_eq!(
            queue.retry(EntryId(99)),
            Err(QueueError::UnknownEntry(EntryId(99)))
        );
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let fixture = Fixture::new()
            .with("/pkgs/a.deb", deb("a", "1.0", "amd64"))
            .with("/pkgs/b.deb", deb("b", "1.0", "armhf"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_run().never();
        let queue = queue(&fixture, backend);
        let mut rx = queue.subscribe();

        let a = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        let b = queue.enqueue(Path::new("/pkgs/b.deb")).await.unwrap();
        queue.cancel_pending(a).unwrap();
        assert!(queue.entry(a).is_none());
        assert!(drain(&mut rx).contains(&QueueEvent::Withdrawn { id: a }));

        assert_eq!(queue.cancel_pending(b), Err(QueueError::NotWaiting(b)));
        queue.run_pending().await;
    }

    #[tokio::test]
    async fn test_dismiss_only_finished_entries() {
        let fixture = Fixture::new()
            .with("/pkgs/a.deb", deb("a", "1.0", "amd64"))
            .with("/pkgs/b.deb", deb("b", "1.0", "armhf"));
        let queue = queue(&fixture, fixture.backend(&["amd64"]));

        let a = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        let b = queue.enqueue(Path::new("/pkgs/b.deb")).await.unwrap();
        assert_eq!(queue.dismiss(a), Err(QueueError::Busy(a)));
        queue.dismiss(b).unwrap();
        assert_eq!(queue.snapshot().len(), 1);

        // A dismissed path may be queued again.
        assert!(queue.enqueue(Path::new("/pkgs/b.deb")).await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_dependencies_fail_before_execution() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().returning(|_| {
            Ok(DependencyReport {
                broken: vec!["libz".into(), "liba".into()],
                resolvable: false,
                failure: None,
            })
        });
        backend.expect_run().never();
        let queue = queue(&fixture, backend);
        let mut rx = queue.subscribe();

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;

        let entry = queue.entry(id).unwrap();
        assert_eq!(
            entry.failure_reason,
            Some(InstallError::BrokenDependencies(vec![
                "libz".into(),
                "liba".into()
            ]))
        );
        assert!(!entry.dependency_summary.unwrap().ok);
        assert_eq!(
            transitions(&drain(&mut rx), id),
            vec![(EntryStatus::Waiting, EntryStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn test_inspect_keeps_entry_waiting() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().returning(|_| {
            Ok(DependencyReport {
                broken: vec!["libdep".into()],
                resolvable: true,
                failure: None,
            })
        });
        backend.expect_run().never();
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        let verdict = queue.inspect(id).await.unwrap();
        assert!(verdict.ok);
        assert_eq!(verdict.pending, vec!["libdep"]);

        let entry = queue.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Waiting);
        assert_eq!(entry.dependency_summary, Some(verdict));
    }

    #[tokio::test]
    async fn test_network_failure_during_inspection() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().returning(|_| {
            Ok(DependencyReport {
                failure: Some((FailureCategory::Network, "Could not resolve host".into())),
                ..Default::default()
            })
        });
        backend.expect_run().never();
        let queue = queue(&fixture, backend);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;
        assert!(matches!(
            queue.entry(id).unwrap().failure_reason,
            Some(InstallError::NetworkFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_dependencies_are_announced() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        backend.expect_compute_dependencies().returning(|_| {
            Ok(DependencyReport {
                broken: vec!["libdep".into()],
                resolvable: true,
                failure: None,
            })
        });
        recording_runs(&mut backend);
        let queue = queue(&fixture, backend);
        let mut rx = queue.subscribe();

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        queue.run_pending().await;

        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Installed);
        assert!(drain(&mut rx).contains(&QueueEvent::Progress {
            id,
            progress: ProgressEvent::DependenciesPending {
                names: vec!["libdep".into()]
            }
        }));
    }

    #[tokio::test]
    async fn test_disk_space_is_checked_again_before_execution() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        backend.expect_run().never();
        let queue = queue(&fixture, backend);
        let mut rx = queue.subscribe();

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        fixture.set_free_space(1024);
        queue.run_pending().await;

        assert!(matches!(
            queue.entry(id).unwrap().failure_reason,
            Some(InstallError::InsufficientDiskSpace(Some(_)))
        ));
        assert_eq!(
            transitions(&drain(&mut rx), id),
            vec![
                (EntryStatus::Waiting, EntryStatus::Installing),
                (EntryStatus::Installing, EntryStatus::Failed),
            ]
        );
    }

    /// Backend whose runs last until they are interrupted.
    struct Interruptible(MockPackageBackend);

    #[async_trait]
    impl PackageBackend for Interruptible {
        async fn host_architectures(&self) -> anyhow::Result<Vec<String>> {
            self.0.host_architectures().await
        }

        async fn query(&self, path: &Path) -> anyhow::Result<PackageQuery> {
            self.0.query(path).await
        }

        async fn verify_signature(&self, path: &Path) -> anyhow::Result<SignatureStatus> {
            self.0.verify_signature(path).await
        }

        async fn installed_version(
            &self,
            name: &str,
            architecture: &str,
        ) -> anyhow::Result<Option<String>> {
            self.0.installed_version(name, architecture).await
        }

        async fn compute_dependencies(&self, path: &Path) -> anyhow::Result<DependencyReport> {
            self.0.compute_dependencies(path).await
        }

        async fn compute_removal(&self, package: &str) -> anyhow::Result<RemovalReport> {
            self.0.compute_removal(package).await
        }

        async fn run(
            &self,
            _request: ManagerRequest,
            _progress: mpsc::UnboundedSender<ProgressEvent>,
            mut cancel: watch::Receiver<bool>,
        ) -> anyhow::Result<ManagerOutcome> {
            let _ = cancel.wait_for(|cancelled| *cancelled).await;
            Ok(ManagerOutcome::Failed {
                category: FailureCategory::Generic,
                diagnostic: "E: Operation was interrupted".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_active_follows_manager_outcome() {
        let fixture = Fixture::new().with("/pkgs/a.deb", deb("a", "1.0", "amd64"));
        let mut backend = fixture.backend(&["amd64"]);
        satisfied(&mut backend);
        let queue = InstallQueue::new(
            Arc::new(fixture.runtime()),
            Arc::new(Interruptible(backend)),
            AdmissionPolicy::default(),
        );
        assert_eq!(queue.cancel_active(), None);

        let id = queue.enqueue(Path::new("/pkgs/a.deb")).await.unwrap();
        let mut rx = queue.subscribe();
        let drain_task = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run_pending().await }
        });

        loop {
            if let QueueEvent::StatusChanged { entry, .. } = rx.recv().await.unwrap()
                && entry.status == EntryStatus::Installing
            {
                break;
            }
        }
        assert_eq!(queue.entry(id).unwrap().status, EntryStatus::Installing);
        assert_eq!(queue.cancel_active(), Some(id));
        drain_task.await.unwrap();

        assert_eq!(
            queue.entry(id).unwrap().failure_reason,
            Some(InstallError::InstallFailure(
                "E: Operation was interrupted".into()
            ))
        );
        assert_eq!(queue.cancel_active(), None);
    }
}
