//! Operator-facing output for the installer CLI.
//!
//! Progress lines go to an injected writer (stderr in production) so tests
//! can capture them, and the dry-run plan is formatted here.

use crate::config::HostPlatform;
use crate::image::ImageReference;
use crate::resolver::RepositorySet;
use camino::Utf8Path;
use std::io::Write;

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

/// Line reported once the tooling bundle has been installed.
#[must_use]
pub fn bundle_installed_message(name: &str, version: &str) -> String {
    let stem = name.strip_suffix(".sh").unwrap_or(name);
    format!("Installed {stem} {version}")
}

/// Everything a dry run reports.
///
/// # Example
///
/// ```
/// use camino::Utf8Path;
/// use km_installer::config::HostPlatform;
/// use km_installer::image::ImageReference;
/// use km_installer::output::DryRunInfo;
/// use km_installer::resolver::RepositorySet;
///
/// let image = ImageReference::new("ghcr.io/kiracore/docker/base-image", "v0.13.7");
/// let repositories = RepositorySet::for_owner("KiraCore", ["sekai"]);
/// let platform = HostPlatform::new("linux", "x86_64");
///
/// let info = DryRunInfo {
///     image: &image,
///     platform: &platform,
///     repositories: &repositories,
///     trust_anchor_path: Utf8Path::new("/usr/keys/kira-cosign.pub"),
///     verifier_path: Utf8Path::new("/usr/local/bin/cosign"),
///     bundle_version: "v0.3.42",
///     work_dir: Utf8Path::new("/var/tmp/km-installer"),
///     install_tools: true,
///     quiet: false,
/// };
///
/// let output = info.display_text();
/// assert!(output.contains("Dry run"));
/// assert!(output.contains("KiraCore/sekai"));
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// The base image that would be verified and pulled.
    pub image: &'a ImageReference,
    /// Detected host platform.
    pub platform: &'a HostPlatform,
    /// Repositories whose releases would be resolved.
    pub repositories: &'a RepositorySet,
    /// Where the trust anchor would be written.
    pub trust_anchor_path: &'a Utf8Path,
    /// Where the signature verifier would be installed.
    pub verifier_path: &'a Utf8Path,
    /// Pinned tooling bundle version.
    pub bundle_version: &'a str,
    /// Download staging directory.
    pub work_dir: &'a Utf8Path,
    /// Whether the tooling bundle would be installed.
    pub install_tools: bool,
    /// Whether quiet mode is enabled.
    pub quiet: bool,
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let mut lines = vec![
            "Dry run - nothing will be downloaded, verified, or installed".to_owned(),
            String::new(),
            format!("Platform: {}", self.platform),
            format!("Base image: {}", self.image),
            format!("Trust anchor: {}", self.trust_anchor_path),
            format!("Verifier: {}", self.verifier_path),
            format!("Work directory: {}", self.work_dir),
            format!("Install tools: {}", self.install_tools),
            format!("Quiet: {}", self.quiet),
        ];

        if self.install_tools {
            lines.push(format!("Tooling bundle: {}", self.bundle_version));
        }

        lines.push(String::new());
        lines.push("Repositories to resolve:".to_owned());
        if self.repositories.is_empty() {
            lines.push("  (none)".to_owned());
        }
        for repo in self.repositories {
            lines.push(format!("  - {}", repo.id));
        }

        lines.join("\n")
    }
}
