//! Bootstrap install pipeline.
//!
//! Installs the signature verifier and then the signed tooling bundle. The
//! pipeline is a linear state machine:
//!
//! ```text
//! NotStarted -> ToolingFetched -> ToolingVerified -> ToolingExecutable -> ToolingInstalled
//! ```
//!
//! Any failing step moves it to [`InstallStage::Failed`], from which nothing
//! else may run. An artefact is made executable, moved to its final path, or
//! executed only after its gate has accepted that exact file.

use crate::artefact::checksum::{ChecksumOutcome, check_hash};
use crate::artefact::download::ArtefactFetcher;
use crate::artefact::signature::DetachedVerifier;
use crate::command::{CommandExecutor, command_succeeds, run_checked};
use crate::config::{BootstrapConfig, HostPlatform};
use crate::error::{InstallerError, Result};
use crate::output::{bundle_installed_message, write_stderr_line};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::io::Write;

/// Position of the pipeline in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    /// Nothing has run yet.
    NotStarted,
    /// The verifier binary has been downloaded to the staging area.
    ToolingFetched,
    /// The staged verifier passed the checksum gate.
    ToolingVerified,
    /// The verifier is executable at its canonical path.
    ToolingExecutable,
    /// The tooling bundle was verified, executed, and recorded.
    ToolingInstalled,
    /// A step failed; the run cannot continue.
    Failed,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::ToolingFetched => "tooling fetched",
            Self::ToolingVerified => "tooling verified",
            Self::ToolingExecutable => "tooling executable",
            Self::ToolingInstalled => "tooling installed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Where a verified artefact must end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    /// Current location of the artefact.
    pub local_path: Utf8PathBuf,
    /// Whether the executable bit has been set.
    pub executable: bool,
}

/// Drives the verifier and bundle installation for one run.
pub struct InstallPipeline<'a> {
    config: &'a BootstrapConfig,
    platform: &'a HostPlatform,
    fetcher: &'a dyn ArtefactFetcher,
    executor: &'a dyn CommandExecutor,
    verifier: &'a dyn DetachedVerifier,
    stage: InstallStage,
    history: Vec<InstallStage>,
    checksum: Option<ChecksumOutcome>,
    tool: Option<InstallTarget>,
}

impl<'a> InstallPipeline<'a> {
    /// Create a pipeline in [`InstallStage::NotStarted`].
    #[must_use]
    pub fn new(
        config: &'a BootstrapConfig,
        platform: &'a HostPlatform,
        fetcher: &'a dyn ArtefactFetcher,
        executor: &'a dyn CommandExecutor,
        verifier: &'a dyn DetachedVerifier,
    ) -> Self {
        Self {
            config,
            platform,
            fetcher,
            executor,
            verifier,
            stage: InstallStage::NotStarted,
            history: vec![InstallStage::NotStarted],
            checksum: None,
            tool: None,
        }
    }

    /// The current stage.
    #[must_use]
    pub const fn stage(&self) -> InstallStage {
        self.stage
    }

    /// Every stage entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[InstallStage] {
        &self.history
    }

    /// Outcome of the verifier checksum gate, if the verifier was downloaded.
    #[must_use]
    pub const fn checksum_outcome(&self) -> Option<&ChecksumOutcome> {
        self.checksum.as_ref()
    }

    /// The verifier executable every gate must run: the install path after a
    /// download, or the command name when an existing verifier was reused.
    ///
    /// `None` until the pipeline reaches [`InstallStage::ToolingExecutable`].
    #[must_use]
    pub fn verifier_tool(&self) -> Option<&Utf8Path> {
        self.tool.as_ref().map(|target| target.local_path.as_path())
    }

    /// Run the whole pipeline: verifier, trust anchor, then tooling bundle.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; the pipeline is then
    /// [`InstallStage::Failed`].
    pub fn run(&mut self, stderr: &mut dyn Write, quiet: bool) -> Result<()> {
        self.bootstrap_verifier(stderr, quiet)?;
        if !quiet {
            write_stderr_line(
                stderr,
                format!("Installing {} {}...", self.config.bundle.name, self.config.bundle.version),
            );
        }
        let message = self.install_bundle()?;
        if !quiet {
            write_stderr_line(stderr, message);
        }
        Ok(())
    }

    /// Make the verifier available and write the trust anchor.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn bootstrap_verifier(&mut self, stderr: &mut dyn Write, quiet: bool) -> Result<()> {
        if !quiet {
            write_stderr_line(
                stderr,
                format!("Preparing signature verifier for {}...", self.platform),
            );
        }
        let target = self.prepare_verifier()?;
        if !quiet {
            write_stderr_line(stderr, format!("Verifier ready at {}", target.local_path));
        }
        let key = self.write_trust_anchor()?;
        if !quiet {
            write_stderr_line(stderr, format!("Public key written to {key}"));
        }
        Ok(())
    }

    /// Bring the verifier to [`InstallStage::ToolingExecutable`].
    ///
    /// A verifier that already answers `version` is used as is; otherwise the
    /// pinned release is fetched, checksum-verified, and promoted.
    ///
    /// # Errors
    ///
    /// Returns a download, checksum, or filesystem error.
    pub fn prepare_verifier(&mut self) -> Result<InstallTarget> {
        self.require(InstallStage::NotStarted)?;
        let command = self.config.verifier.command.as_str();
        if command_succeeds(self.executor, command, &["version"]) {
            log::debug!("{command} is already installed");
            let target = InstallTarget {
                local_path: Utf8PathBuf::from(command),
                executable: true,
            };
            self.tool = Some(target.clone());
            self.advance(InstallStage::ToolingExecutable);
            return Ok(target);
        }

        let staged = self.fetch_verifier()?;
        self.verify_verifier(&staged)?;
        self.activate_verifier(staged)
    }

    /// Download the verifier release binary into the staging directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::Download`] or an I/O error.
    pub fn fetch_verifier(&mut self) -> Result<InstallTarget> {
        self.require(InstallStage::NotStarted)?;
        let verifier = &self.config.verifier;
        let asset = verifier.asset_name(self.platform);
        let dest = self.config.work_dir.join(&asset);
        let url = verifier.download_url(self.platform);
        let result = self.download(&url, &asset, &dest);
        self.settle(result)?;
        self.advance(InstallStage::ToolingFetched);
        Ok(InstallTarget {
            local_path: dest,
            executable: false,
        })
    }

    /// Check the staged verifier against the pinned digest for the host
    /// architecture.
    ///
    /// An architecture with no pin passes as [`ChecksumOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::Checksum`] on mismatch or read failure.
    pub fn verify_verifier(&mut self, staged: &InstallTarget) -> Result<ChecksumOutcome> {
        self.require(InstallStage::ToolingFetched)?;
        let result = check_hash(
            staged.local_path.as_std_path(),
            &self.platform.architecture,
            &self.config.verifier.pinned,
        )
        .map_err(InstallerError::from);
        let outcome = self.settle(result)?;
        self.checksum = Some(outcome.clone());
        self.advance(InstallStage::ToolingVerified);
        Ok(outcome)
    }

    /// Mark the verified verifier executable and move it to its install path.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::Install`] if either filesystem step fails.
    pub fn activate_verifier(&mut self, staged: InstallTarget) -> Result<InstallTarget> {
        self.require(InstallStage::ToolingVerified)?;
        let install_path = self.config.verifier.install_path.clone();
        let result = make_executable(&staged.local_path)
            .and_then(|()| promote(&staged.local_path, &install_path));
        self.settle(result)?;
        let target = InstallTarget {
            local_path: install_path,
            executable: true,
        };
        self.tool = Some(target.clone());
        self.advance(InstallStage::ToolingExecutable);
        Ok(target)
    }

    /// Write the embedded trust anchor to its well-known path, replacing any
    /// existing file.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::TrustMaterial`] on filesystem failure.
    pub fn write_trust_anchor(&mut self) -> Result<Utf8PathBuf> {
        let path = self.config.trust_anchor_path.clone();
        let result = fs::create_dir_all(&self.config.keys_dir)
            .and_then(|()| fs::write(&path, self.config.trust_anchor.pem()))
            .map_err(|source| InstallerError::TrustMaterial {
                path: path.clone(),
                source,
            });
        self.settle(result)?;
        log::debug!("trust anchor written to {path}");
        Ok(path)
    }

    /// Fetch, verify, and execute the tooling bundle.
    ///
    /// Requires [`InstallStage::ToolingExecutable`] and the trust anchor on
    /// disk. Returns the line to report to the operator.
    ///
    /// # Errors
    ///
    /// Returns a download, signature, filesystem, or subprocess error.
    pub fn install_bundle(&mut self) -> Result<String> {
        self.require(InstallStage::ToolingExecutable)?;
        let result = self.install_bundle_steps();
        let message = self.settle(result)?;
        self.advance(InstallStage::ToolingInstalled);
        Ok(message)
    }

    fn install_bundle_steps(&self) -> Result<String> {
        let tool = self.verifier_tool().ok_or(InstallerError::StageOrder {
            expected: InstallStage::ToolingExecutable,
            actual: self.stage,
        })?;
        let bundle = &self.config.bundle;
        let script = self.config.work_dir.join(&bundle.name);
        let signature = self.config.work_dir.join(bundle.signature_name());

        self.download(&bundle.download_url(), &bundle.name, &script)?;
        self.download(&bundle.signature_url(), &bundle.signature_name(), &signature)?;

        self.verifier.verify_detached(
            tool.as_std_path(),
            script.as_std_path(),
            signature.as_std_path(),
            self.config.trust_anchor_path.as_std_path(),
        )?;

        make_executable(&script)?;
        let setup_args: Vec<&str> = bundle.setup_args.iter().map(String::as_str).collect();
        run_checked(self.executor, script.as_str(), &setup_args)?;
        run_checked(
            self.executor,
            &bundle.profile_reload.program,
            &bundle.profile_reload.arg_refs(),
        )?;

        write_marker(&bundle.marker_path, &bundle.version)?;
        Ok(bundle_installed_message(&bundle.name, &bundle.version))
    }

    fn download(&self, url: &str, artefact: &str, dest: &Utf8Path) -> Result<()> {
        fs::create_dir_all(&self.config.work_dir)?;
        log::debug!("downloading {url}");
        self.fetcher
            .download(url, dest.as_std_path())
            .map_err(|source| InstallerError::Download {
                artefact: artefact.to_owned(),
                source,
            })
    }

    fn require(&mut self, expected: InstallStage) -> Result<()> {
        if self.stage == expected {
            return Ok(());
        }
        let actual = self.stage;
        self.fail();
        Err(InstallerError::StageOrder { expected, actual })
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn fail(&mut self) {
        if self.stage != InstallStage::Failed {
            log::debug!("install pipeline failed in stage {}", self.stage);
            self.advance(InstallStage::Failed);
        }
    }

    fn advance(&mut self, next: InstallStage) {
        log::debug!("install pipeline: {} -> {next}", self.stage);
        self.stage = next;
        self.history.push(next);
    }
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|err| {
        InstallerError::Install {
            path: path.to_owned(),
            reason: format!("failed to set executable permission: {err}"),
        }
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Utf8Path) -> Result<()> {
    Ok(())
}

/// Move `from` to `to`, copying when they are on different filesystems.
fn promote(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    let install_error = |err: std::io::Error| InstallerError::Install {
        path: to.to_owned(),
        reason: format!("failed to move {from} into place: {err}"),
    };

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(install_error)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::CrossesDevices => {
            fs::copy(from, to).map_err(install_error)?;
            fs::remove_file(from).map_err(install_error)
        }
        Err(err) => Err(install_error(err)),
    }
}

fn write_marker(path: &Utf8Path, version: &str) -> Result<()> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{version}\n"))
    };
    write().map_err(|err| InstallerError::Install {
        path: path.to_owned(),
        reason: format!("failed to record installed version: {err}"),
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
