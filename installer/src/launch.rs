//! Run orchestration.
//!
//! A run installs the verifier and tooling, gates and pulls the base image,
//! resolves the selected repositories, and downloads one release package per
//! resolved repository. Each step consumes the previous step's result, and
//! the first failure ends the run. Only per-repository resolution failures
//! are tolerated.

use crate::artefact::download::ArtefactFetcher;
use crate::artefact::signature::DetachedVerifier;
use crate::cli::Cli;
use crate::command::CommandExecutor;
use crate::config::{BootstrapConfig, HostPlatform};
use crate::error::{InstallerError, Result};
use crate::image::{ImagePuller, ImageReference, ImageVerifier, approve_and_pull};
use crate::output::{DryRunInfo, write_stderr_line};
use crate::pipeline::{InstallPipeline, InstallStage};
use crate::release::{ReleaseIndex, fetch_release_asset};
use crate::resolver::{RepositorySet, resolve};
use camino::Utf8PathBuf;
use std::io::Write;

/// Validate a base-image version, accepting an optional leading `v`.
///
/// # Errors
///
/// Returns [`InstallerError::InvalidImageVersion`] if the rest is not a
/// semantic version.
///
/// # Examples
///
/// ```
/// use km_installer::launch::validate_base_image_version;
///
/// assert!(validate_base_image_version("v0.13.7").is_ok());
/// assert!(validate_base_image_version("0.13.7").is_ok());
/// assert!(validate_base_image_version("latest").is_err());
/// ```
pub fn validate_base_image_version(value: &str) -> Result<semver::Version> {
    let bare = value.strip_prefix('v').unwrap_or(value);
    semver::Version::parse(bare).map_err(|err| InstallerError::InvalidImageVersion {
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

/// What a run will do, derived from the command line and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// The base image to verify and pull.
    pub base_image: ImageReference,
    /// Repositories to resolve and download packages for.
    pub repositories: RepositorySet,
    /// Whether the tooling bundle is installed.
    pub install_tools: bool,
    /// Suppress progress output.
    pub quiet: bool,
}

impl LaunchPlan {
    /// Build the plan for `cli` under `config`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidImageVersion`] for a malformed
    /// `--image` value.
    pub fn from_cli(cli: &Cli, config: &BootstrapConfig) -> Result<Self> {
        validate_base_image_version(&cli.image_version)?;
        Ok(Self {
            base_image: ImageReference::new(&config.base_image_repository, &cli.image_version),
            repositories: RepositorySet::for_owner(
                &config.repository_owner,
                cli.selected_repositories(&config.repositories),
            ),
            install_tools: !cli.skip_tools,
            quiet: cli.quiet,
        })
    }

    /// Describe the plan for a dry run.
    #[must_use]
    pub fn dry_run_text(&self, config: &BootstrapConfig, platform: &HostPlatform) -> String {
        DryRunInfo {
            image: &self.base_image,
            platform,
            repositories: &self.repositories,
            trust_anchor_path: &config.trust_anchor_path,
            verifier_path: &config.verifier.install_path,
            bundle_version: &config.bundle.version,
            work_dir: &config.work_dir,
            install_tools: self.install_tools,
            quiet: self.quiet,
        }
        .display_text()
    }
}

/// External capabilities a run depends on.
pub struct Collaborators<'a> {
    /// Downloads artefacts.
    pub fetcher: &'a dyn ArtefactFetcher,
    /// Runs external commands.
    pub executor: &'a dyn CommandExecutor,
    /// Verifies detached signatures.
    pub blob_verifier: &'a dyn DetachedVerifier,
    /// Verifies image signatures.
    pub image_verifier: &'a dyn ImageVerifier,
    /// Pulls images.
    pub puller: &'a dyn ImagePuller,
    /// Answers release queries.
    pub releases: &'a dyn ReleaseIndex,
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// Repositories that resolved, with their tags.
    pub resolved: RepositorySet,
    /// Downloaded release packages, in repository order.
    pub packages: Vec<Utf8PathBuf>,
}

/// Execute `plan`.
///
/// # Errors
///
/// Returns the first fatal error: a pipeline, image trust, pull, or package
/// download failure.
pub fn launch(
    plan: &LaunchPlan,
    config: &BootstrapConfig,
    platform: &HostPlatform,
    tools: &Collaborators<'_>,
    stderr: &mut dyn Write,
) -> Result<LaunchReport> {
    let mut pipeline = InstallPipeline::new(
        config,
        platform,
        tools.fetcher,
        tools.executor,
        tools.blob_verifier,
    );
    if plan.install_tools {
        pipeline.run(stderr, plan.quiet)?;
    } else {
        pipeline.bootstrap_verifier(stderr, plan.quiet)?;
    }

    let verifier_tool = pipeline
        .verifier_tool()
        .ok_or(InstallerError::StageOrder {
            expected: InstallStage::ToolingExecutable,
            actual: pipeline.stage(),
        })?;
    progress(plan, stderr, format!("Verifying {}...", plan.base_image));
    approve_and_pull(
        tools.image_verifier,
        tools.puller,
        verifier_tool.as_std_path(),
        &plan.base_image,
        config.trust_anchor_path.as_std_path(),
    )?;
    progress(plan, stderr, format!("Image verified and pulled: {}", plan.base_image));

    let resolution = resolve(&plan.repositories, tools.releases);
    let resolved = resolution.apply_to(&plan.repositories);
    for (id, err) in resolution.failures() {
        progress(plan, stderr, format!("Skipping {id}: {err}"));
    }

    let dest_dir = config.work_dir.join("packages");
    let mut packages = Vec::with_capacity(resolved.len());
    for repo in &resolved {
        let asset = config.release_asset_name(&repo.id.name, platform);
        let tag = repo.pinned_version.as_deref().unwrap_or("latest");
        progress(plan, stderr, format!("Downloading {asset} from {} {tag}...", repo.id));
        packages.push(fetch_release_asset(
            tools.releases,
            tools.fetcher,
            repo,
            &asset,
            &dest_dir,
        )?);
    }

    Ok(LaunchReport { resolved, packages })
}

fn progress(plan: &LaunchPlan, stderr: &mut dyn Write, message: String) {
    if !plan.quiet {
        write_stderr_line(stderr, message);
    }
}
