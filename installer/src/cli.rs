//! CLI argument definitions for the KIRA bootstrap installer.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::config::DEFAULT_BASE_IMAGE_VERSION;
use camino::Utf8PathBuf;
use clap::Parser;

/// Bootstrap a KIRA node host with verified tooling and images.
#[derive(Parser, Debug, Clone)]
#[command(name = "km-installer")]
#[command(version, about)]
#[command(long_about = concat!(
    "Bootstrap a KIRA node host with verified tooling and images.\n\n",
    "The installer fetches the cosign signature verifier and checks it against a ",
    "pinned digest, writes the KIRA public key, installs the signed bash-utils ",
    "bundle, verifies and pulls the base image, and downloads the latest sekai and ",
    "interx release packages.\n\n",
    "Nothing is executed or pulled until its checksum or signature has been verified. ",
    "Any verification failure stops the run with a non-zero exit status.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Bootstrap with the default base image:\n",
    "    $ sudo -E km-installer\n\n",
    "  Use a specific base image and only prepare sekai:\n",
    "    $ sudo -E km-installer --image v0.13.7 --sekai\n\n",
    "  Preview without touching the system:\n",
    "    $ km-installer --dry-run\n\n",
    "ENVIRONMENT:\n",
    "  GITHUB_TOKEN   Credential for release queries\n",
    "  KM_LOG         Log filter, e.g. debug or km_installer=trace",
))]
pub struct Cli {
    /// Base image version to verify and pull.
    #[arg(long = "image", value_name = "VERSION", default_value = DEFAULT_BASE_IMAGE_VERSION)]
    pub image_version: String,

    /// Prepare the sekai release package.
    #[arg(long)]
    pub sekai: bool,

    /// Prepare the interx release package.
    #[arg(long)]
    pub interx: bool,

    /// Credential for release index queries.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub github_token: Option<String>,

    /// Skip the tooling bundle; the verifier and key are still installed.
    #[arg(long)]
    pub skip_tools: bool,

    /// Show the plan and exit without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Suppress progress output (errors still shown).
    #[arg(short, long)]
    pub quiet: bool,

    /// Install under an alternate filesystem root.
    #[arg(long, value_name = "DIR", hide = true)]
    pub root: Option<Utf8PathBuf>,
}

impl Cli {
    /// Filter `declared` repository names down to the ones requested.
    ///
    /// With neither `--sekai` nor `--interx` every declared repository is
    /// kept.
    ///
    /// # Examples
    ///
    /// ```
    /// use clap::Parser;
    /// use km_installer::cli::Cli;
    ///
    /// let declared = ["sekai".to_owned(), "interx".to_owned()];
    ///
    /// let cli = Cli::parse_from(["km-installer", "--interx"]);
    /// assert_eq!(cli.selected_repositories(&declared), ["interx"]);
    ///
    /// let cli = Cli::parse_from(["km-installer"]);
    /// assert_eq!(cli.selected_repositories(&declared), ["sekai", "interx"]);
    /// ```
    #[must_use]
    pub fn selected_repositories<'a>(&self, declared: &'a [String]) -> Vec<&'a str> {
        let any_selected = self.sekai || self.interx;
        declared
            .iter()
            .map(String::as_str)
            .filter(|name| {
                !any_selected
                    || (*name == "sekai" && self.sekai)
                    || (*name == "interx" && self.interx)
            })
            .collect()
    }
}

impl Default for Cli {
    /// Creates a `Cli` with default values and every flag disabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use km_installer::cli::Cli;
    ///
    /// let cli = Cli::default();
    /// assert_eq!(cli.image_version, "v0.13.7");
    /// assert!(!cli.dry_run);
    /// ```
    fn default() -> Self {
        Self {
            image_version: DEFAULT_BASE_IMAGE_VERSION.to_owned(),
            sekai: false,
            interx: false,
            github_token: None,
            skip_tools: false,
            dry_run: false,
            quiet: false,
            root: None,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
