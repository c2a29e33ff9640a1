use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use super::diagnostics::{self, SimulatedAction, bare_name};
use super::{
    AffectedPackage, DependencyReport, FailureCategory, ManagerOutcome, ManagerRequest,
    PackageBackend, PackageQuery, ProgressEvent, RemovalReport, SignatureStatus,
};
use crate::archive::read_deb;
use crate::config::{Config, Elevation, ToolPaths};
use crate::package::{Operation, PackageMetadata};
use crate::runtime::Runtime;

/// Lines of manager output kept for the failure diagnostic.
const TAIL_LINES: usize = 40;

// debsig-verify exit codes
const DEBSIG_OK: i32 = 0;
const DEBSIG_NO_SIGNATURES: i32 = 10;

struct CommandOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// [`PackageBackend`] driving dpkg and apt.
pub struct AptBackend<R: Runtime> {
    runtime: R,
    tools: ToolPaths,
    elevate: Elevation,
}

impl<R: Runtime> AptBackend<R> {
    pub fn new(runtime: R, config: &Config) -> Self {
        Self {
            runtime,
            tools: config.tools.clone(),
            elevate: config.elevate,
        }
    }

    async fn capture<I, S>(&self, program: &Path, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(program)
            .args(args)
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program.display()))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Build the apt-get command, going through the elevation helper when
    /// not running as root. `pkexec` drops the environment, so it is passed
    /// through `env`.
    fn manager_command(&self, args: Vec<OsString>) -> Command {
        let elevate = if self.runtime.is_privileged() {
            None
        } else {
            self.elevate.program()
        };

        let mut command = match elevate {
            Some(helper) => {
                debug!("Elevating package manager run with {}", helper);
                let mut command = Command::new(helper);
                command
                    .arg("env")
                    .arg("DEBIAN_FRONTEND=noninteractive")
                    .arg("LANG=C")
                    .arg(&self.tools.apt_get);
                command
            }
            None => Command::new(&self.tools.apt_get),
        };

        command
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .env("LANG", "C")
            .env("LC_ALL", "C");
        command
    }

    async fn is_essential(&self, package: &str) -> bool {
        match self
            .capture(&self.tools.dpkg_query, ["-W", "-f=${Essential}", package])
            .await
        {
            Ok(out) if out.success => out.stdout.trim() == "yes",
            Ok(_) => false,
            Err(err) => {
                warn!("Could not read Essential flag of {}: {}", package, err);
                false
            }
        }
    }

    async fn reverse_dependencies(&self, package: &str) -> Result<Vec<String>> {
        let out = self
            .capture(&self.tools.apt_cache, ["rdepends", "--installed", package])
            .await?;
        if !out.success {
            debug!("apt-cache rdepends {} failed: {}", package, out.stderr.trim());
            return Ok(Vec::new());
        }
        let own = bare_name(package);
        Ok(diagnostics::reverse_dependencies(&out.stdout)
            .into_iter()
            .map(|name| bare_name(&name).to_string())
            .filter(|name| name != own)
            .collect())
    }

    async fn control_from_dpkg_deb(&self, path: &Path) -> Result<String> {
        let out = self
            .capture(&self.tools.dpkg_deb, [OsStr::new("--field"), path.as_os_str()])
            .await?;
        if !out.success {
            bail!("dpkg-deb could not read {}: {}", path.display(), out.stderr.trim());
        }
        Ok(out.stdout)
    }
}

#[async_trait]
impl<R: Runtime + 'static> PackageBackend for AptBackend<R> {
    #[tracing::instrument(skip(self))]
    async fn host_architectures(&self) -> Result<Vec<String>> {
        let native = self
            .capture(&self.tools.dpkg, ["--print-architecture"])
            .await?;
        if !native.success {
            bail!("dpkg --print-architecture failed: {}", native.stderr.trim());
        }
        let mut architectures = vec![native.stdout.trim().to_string()];

        let foreign = self
            .capture(&self.tools.dpkg, ["--print-foreign-architectures"])
            .await?;
        if foreign.success {
            architectures.extend(foreign.stdout.split_whitespace().map(str::to_string));
        }

        debug!("Host architectures: {:?}", architectures);
        Ok(architectures)
    }

    #[tracing::instrument(skip(self))]
    async fn query(&self, path: &Path) -> Result<PackageQuery> {
        let reader = self.runtime.open(path)?;
        let contents = tokio::task::spawn_blocking(move || read_deb(reader))
            .await
            .context("Archive reader task failed")??;

        let control = match contents.control {
            Some(text) => text,
            None => {
                debug!(
                    "{} is not handled natively, asking dpkg-deb",
                    contents.control_member
                );
                self.control_from_dpkg_deb(path).await?
            }
        };

        Ok(PackageQuery {
            metadata: PackageMetadata::parse(&control)?,
            signature_present: !contents.signatures.is_empty(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn verify_signature(&self, path: &Path) -> Result<SignatureStatus> {
        let out = self
            .capture(&self.tools.debsig_verify, [path.as_os_str()])
            .await?;
        Ok(match out.code {
            Some(DEBSIG_OK) => SignatureStatus::Valid,
            Some(DEBSIG_NO_SIGNATURES) => SignatureStatus::Missing,
            _ => SignatureStatus::Invalid(out.combined().trim().to_string()),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn installed_version(&self, name: &str, architecture: &str) -> Result<Option<String>> {
        let target = if architecture == "all" {
            name.to_string()
        } else {
            format!("{}:{}", name, architecture)
        };
        let out = self
            .capture(
                &self.tools.dpkg_query,
                ["-W", "-f=${Status}\t${Version}\n", target.as_str()],
            )
            .await?;
        if !out.success {
            return Ok(None);
        }

        let installed = out.stdout.lines().find_map(|line| {
            let (status, version) = line.split_once('\t')?;
            (status.split_whitespace().last() == Some("installed") && !version.is_empty())
                .then(|| version.trim().to_string())
        });
        Ok(installed)
    }

    #[tracing::instrument(skip(self))]
    async fn compute_dependencies(&self, path: &Path) -> Result<DependencyReport> {
        let target = self.query(path).await?.metadata.name;
        let out = self
            .capture(
                &self.tools.apt_get,
                [
                    OsStr::new("install"),
                    OsStr::new("--simulate"),
                    OsStr::new("-q"),
                    path.as_os_str(),
                ],
            )
            .await?;

        if out.success {
            let broken = diagnostics::simulated_actions(&out.stdout)
                .into_iter()
                .filter_map(|action| match action {
                    SimulatedAction::Install(name) => Some(bare_name(&name).to_string()),
                    SimulatedAction::Remove(_) => None,
                })
                .filter(|name| *name != target)
                .collect();
            return Ok(DependencyReport {
                broken,
                resolvable: true,
                failure: None,
            });
        }

        let text = out.combined();
        Ok(match diagnostics::classify(&text) {
            FailureCategory::Dependency(names) => DependencyReport {
                broken: names,
                resolvable: false,
                failure: None,
            },
            category => DependencyReport {
                broken: Vec::new(),
                resolvable: false,
                failure: Some((category, text.trim().to_string())),
            },
        })
    }

    #[tracing::instrument(skip(self))]
    async fn compute_removal(&self, package: &str) -> Result<RemovalReport> {
        let out = self
            .capture(&self.tools.apt_get, ["remove", "--simulate", "-q", package])
            .await?;
        if !out.success {
            bail!(
                "apt-get could not plan the removal of {}: {}",
                package,
                out.combined().trim()
            );
        }

        let target = bare_name(package);
        let mut affected = Vec::new();
        for action in diagnostics::simulated_actions(&out.stdout) {
            let SimulatedAction::Remove(name) = action else {
                continue;
            };
            let name = bare_name(&name).to_string();
            if name == target || affected.iter().any(|a: &AffectedPackage| a.name == name) {
                continue;
            }
            let required_by = self.reverse_dependencies(&name).await?;
            let essential = self.is_essential(&name).await;
            affected.push(AffectedPackage {
                name,
                required_by,
                essential,
            });
        }

        Ok(RemovalReport {
            target_essential: self.is_essential(package).await,
            affected,
        })
    }

    #[tracing::instrument(skip(self, progress, cancel))]
    async fn run(
        &self,
        request: ManagerRequest,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ManagerOutcome> {
        let mut args: Vec<OsString> = ["-o", "APT::Status-Fd=1", "-o", "Dpkg::Use-Pty=0", "-y"]
            .into_iter()
            .map(OsString::from)
            .collect();
        match request.operation {
            Operation::Install => {
                args.push("install".into());
                args.push(request.path.clone().into_os_string());
            }
            Operation::Reinstall => {
                args.push("install".into());
                args.push("--reinstall".into());
                args.push(request.path.clone().into_os_string());
            }
            Operation::Uninstall => {
                args.push("remove".into());
                args.push(request.package.clone().into());
            }
        }

        info!("Running package manager: {} {}", request.operation, request.package);
        let mut child = self
            .manager_command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.tools.apt_get.display()))?;

        let stdout = child.stdout.take().context("Manager stdout was not captured")?;
        let stderr = child.stderr.take().context("Manager stderr was not captured")?;
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut text).await;
            text
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
        let mut watching = true;
        if *cancel.borrow_and_update() {
            interrupt(&child);
            watching = false;
        }

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read manager output")? else {
                        break;
                    };
                    match diagnostics::status_line(&line) {
                        Some(event) => {
                            let _ = progress.send(event);
                        }
                        None => {
                            if tail.len() == TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line.clone());
                            let _ = progress.send(ProgressEvent::Output { line });
                        }
                    }
                }
                changed = cancel.changed(), if watching => {
                    match changed {
                        Ok(()) if *cancel.borrow_and_update() => {
                            interrupt(&child);
                            watching = false;
                        }
                        Ok(()) => {}
                        Err(_) => watching = false,
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .context("Failed to wait for the package manager")?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            return Ok(ManagerOutcome::Succeeded);
        }

        let output = tail.into_iter().collect::<Vec<_>>().join("\n");
        let category = diagnostics::classify(&format!("{}\n{}", output, stderr));
        let diagnostic = if stderr.trim().is_empty() {
            output
        } else {
            stderr.trim().to_string()
        };
        warn!("Package manager exited with {}: {:?}", status, category);
        Ok(ManagerOutcome::Failed {
            category,
            diagnostic,
        })
    }
}

/// Ask a running manager to stop. Best effort; the process decides how to exit.
#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    info!("Interrupting package manager (pid {})", pid);
    if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        warn!("Failed to interrupt package manager: {}", err);
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {
    warn!("Interrupting the package manager is not supported on this platform");
}
