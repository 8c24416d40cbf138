//! KIRA bootstrap installer CLI entrypoint.
//!
//! This binary installs the signature verifier and signed tooling bundle,
//! verifies and pulls the base image, and downloads release packages for the
//! selected repositories. It exits non-zero on the first failed gate.

use clap::Parser;
use km_installer::artefact::download::HttpFetcher;
use km_installer::artefact::signature::CosignBlobVerifier;
use km_installer::cli::Cli;
use km_installer::command::SystemCommandExecutor;
use km_installer::config::{BootstrapConfig, HostPlatform};
use km_installer::error::Result;
use km_installer::image::{CosignImageVerifier, EnginePuller};
use km_installer::launch::{Collaborators, LaunchPlan, launch};
use km_installer::output::write_stderr_line;
use km_installer::privilege::check_current_process;
use km_installer::release::GitHubReleaseIndex;
use std::io::Write;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "KM_LOG";
const CONTAINER_ENGINE: &str = "docker";

fn main() {
    init_logging();
    let cli = Cli::parse();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        // A subscriber is already installed; keep it.
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let config = cli
        .root
        .as_deref()
        .map_or_else(BootstrapConfig::production, BootstrapConfig::rooted_at)?;
    let platform = HostPlatform::detect();
    let plan = LaunchPlan::from_cli(cli, &config)?;

    // Dry-run mode: show what would be done without side effects
    if cli.dry_run {
        write_stderr_line(stderr, plan.dry_run_text(&config, &platform));
        return Ok(());
    }

    let level = check_current_process()?;
    log::debug!("running with {level:?}");

    let executor = SystemCommandExecutor;
    let fetcher = HttpFetcher::new(config.network_timeout, config.transfer_timeout);
    let blob_verifier = CosignBlobVerifier::new(&executor);
    let image_verifier = CosignImageVerifier::new(&executor);
    let puller = EnginePuller::new(&executor, CONTAINER_ENGINE);
    let releases = GitHubReleaseIndex::new(cli.github_token.as_deref(), config.network_timeout);
    let tools = Collaborators {
        fetcher: &fetcher,
        executor: &executor,
        blob_verifier: &blob_verifier,
        image_verifier: &image_verifier,
        puller: &puller,
        releases: &releases,
    };

    let report = launch(&plan, &config, &platform, &tools, stderr)?;
    if !plan.quiet {
        write_stderr_line(stderr, "");
        write_stderr_line(
            stderr,
            format!("Prepared {} release package(s):", report.packages.len()),
        );
        for package in &report.packages {
            write_stderr_line(stderr, format!("  - {package}"));
        }
    }
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}
