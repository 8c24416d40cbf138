//! Behaviour tests for the verifier and tooling bundle install pipeline.
//!
//! These scenarios drive [`InstallPipeline`] inside a temporary root with
//! stubbed downloads and commands, and check which trust gate stopped the
//! run and what was left on disk.

use camino::Utf8PathBuf;
use km_installer::artefact::checksum::{ChecksumError, ChecksumOutcome};
use km_installer::artefact::signature::{CosignBlobVerifier, SignatureError};
use km_installer::config::{BootstrapConfig, HostPlatform, PinnedHashes};
use km_installer::error::InstallerError;
use km_installer::pipeline::{InstallPipeline, InstallStage};
use km_installer::test_utils::{
    ExpectedCall, StubExecutor, StubFetcher, failure_output, sha256_hex, success_output,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

const COSIGN_BYTES: &[u8] = b"\x7fELF pretend cosign";
const BUNDLE_BYTES: &[u8] = b"#!/usr/bin/env bash\necho setup\n";

struct PipelineWorld {
    _temp_dir: TempDir,
    config: BootstrapConfig,
    platform: HostPlatform,
    verifier_body: Vec<u8>,
    signature_accepted: bool,
    stage: Option<InstallStage>,
    checksum: Option<ChecksumOutcome>,
    error: Option<InstallerError>,
    commands: Vec<String>,
}

#[fixture]
fn world() -> PipelineWorld {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).expect("UTF-8 path");
    let mut config = BootstrapConfig::rooted_at(&root).expect("config");
    let digest = sha256_hex(COSIGN_BYTES);
    config.verifier.pinned =
        PinnedHashes::from_hex(&[("amd64", digest.as_str())]).expect("pinned digest");
    PipelineWorld {
        _temp_dir: temp_dir,
        config,
        platform: HostPlatform::new("linux", "x86_64"),
        verifier_body: COSIGN_BYTES.to_vec(),
        signature_accepted: true,
        stage: None,
        checksum: None,
        error: None,
        commands: Vec::new(),
    }
}

impl PipelineWorld {
    fn fetcher(&self) -> StubFetcher {
        StubFetcher::new()
            .with_body(
                &self.config.verifier.download_url(&self.platform),
                &self.verifier_body,
            )
            .with_body(&self.config.bundle.download_url(), BUNDLE_BYTES)
            .with_body(&self.config.bundle.signature_url(), b"MEUCIQ signature")
    }

    fn script(&self) -> Utf8PathBuf {
        self.config.work_dir.join(&self.config.bundle.name)
    }

    fn staged_verifier(&self) -> Utf8PathBuf {
        self.config
            .work_dir
            .join(self.config.verifier.asset_name(&self.platform))
    }

    fn bundle_calls(&self) -> Vec<ExpectedCall> {
        let key = self.config.trust_anchor_path.clone();
        let signature = self.config.work_dir.join(self.config.bundle.signature_name());
        let script = self.script();
        let cosign = &self.config.verifier.install_path;
        let verdict = if self.signature_accepted {
            Ok(success_output())
        } else {
            Ok(failure_output("Error: invalid signature when validating ASN.1 encoded signature"))
        };
        let mut calls = vec![ExpectedCall::new(
            cosign.as_str(),
            &[
                "verify-blob",
                "--key",
                key.as_str(),
                "--signature",
                signature.as_str(),
                script.as_str(),
            ],
            verdict,
        )];
        if self.signature_accepted {
            let setup: Vec<&str> =
                self.config.bundle.setup_args.iter().map(String::as_str).collect();
            calls.push(ExpectedCall::new(script.as_str(), &setup, Ok(success_output())));
            calls.push(ExpectedCall::new(
                "bash",
                &["-c", ". /etc/profile"],
                Ok(success_output()),
            ));
        }
        calls
    }

    fn record<T>(
        &mut self,
        pipeline: &InstallPipeline<'_>,
        executor: &StubExecutor,
        result: Result<T, InstallerError>,
    ) {
        self.stage = Some(pipeline.stage());
        self.checksum = pipeline.checksum_outcome().cloned();
        self.commands = executor.seen();
        self.error = result.err();
    }

    fn error(&self) -> &InstallerError {
        self.error.as_ref().expect("the run should have failed")
    }
}

fn cosign_missing() -> ExpectedCall {
    ExpectedCall::new(
        "cosign",
        &["version"],
        Err(InstallerError::CommandLaunch {
            command: "cosign version".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }),
    )
}

#[given("a verifier download matching the pinned digest")]
fn given_matching_download(world: &mut PipelineWorld) {
    world.verifier_body = COSIGN_BYTES.to_vec();
}

#[given("a tampered verifier download")]
fn given_tampered_download(world: &mut PipelineWorld) {
    world.verifier_body = b"\x7fELF something else entirely".to_vec();
}

#[given("the host architecture is \"{architecture}\"")]
fn given_architecture(world: &mut PipelineWorld, architecture: String) {
    world.platform = HostPlatform::new("linux", &architecture);
}

#[given("the bundle signature is accepted")]
fn given_signature_accepted(world: &mut PipelineWorld) {
    world.signature_accepted = true;
}

#[given("the bundle signature is rejected")]
fn given_signature_rejected(world: &mut PipelineWorld) {
    world.signature_accepted = false;
}

#[when("the verifier is prepared")]
fn when_verifier_prepared(world: &mut PipelineWorld) {
    let fetcher = world.fetcher();
    let executor = StubExecutor::new(vec![cosign_missing()]);
    let blob_verifier = CosignBlobVerifier::new(&executor);
    let config = world.config.clone();
    let platform = world.platform.clone();
    let mut pipeline =
        InstallPipeline::new(&config, &platform, &fetcher, &executor, &blob_verifier);

    let result = pipeline.prepare_verifier();
    world.record(&pipeline, &executor, result);
}

#[when("the full pipeline runs")]
fn when_full_pipeline_runs(world: &mut PipelineWorld) {
    let fetcher = world.fetcher();
    let mut calls = vec![cosign_missing()];
    calls.extend(world.bundle_calls());
    let executor = StubExecutor::new(calls);
    let blob_verifier = CosignBlobVerifier::new(&executor);
    let config = world.config.clone();
    let platform = world.platform.clone();
    let mut pipeline =
        InstallPipeline::new(&config, &platform, &fetcher, &executor, &blob_verifier);

    let result = pipeline.run(&mut Vec::<u8>::new(), true);
    world.record(&pipeline, &executor, result);
}

#[when("the bundle is installed before the trust anchor is written")]
fn when_bundle_installed_without_anchor(world: &mut PipelineWorld) {
    let fetcher = world.fetcher();
    let executor = StubExecutor::new(vec![cosign_missing()]);
    let blob_verifier = CosignBlobVerifier::new(&executor);
    let config = world.config.clone();
    let platform = world.platform.clone();
    let mut pipeline =
        InstallPipeline::new(&config, &platform, &fetcher, &executor, &blob_verifier);

    let result = pipeline
        .prepare_verifier()
        .and_then(|_| pipeline.install_bundle());
    world.record(&pipeline, &executor, result);
}

#[then("the verifier is installed and executable")]
fn then_verifier_installed(world: &mut PipelineWorld) {
    assert!(world.error.is_none(), "unexpected error: {:?}", world.error);
    let install_path = &world.config.verifier.install_path;
    let mode = std::fs::metadata(install_path)
        .expect("installed verifier")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(!world.staged_verifier().exists(), "staged copy should be moved");
}

#[then("the verifier is not installed")]
fn then_verifier_not_installed(world: &mut PipelineWorld) {
    assert!(!world.config.verifier.install_path.exists());
    let mode = std::fs::metadata(world.staged_verifier())
        .expect("staged verifier is kept for inspection")
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0, "staged verifier must not be executable");
}

#[then("the checksum outcome is verified")]
fn then_checksum_verified(world: &mut PipelineWorld) {
    assert!(
        matches!(world.checksum, Some(ChecksumOutcome::Verified { .. })),
        "got {:?}",
        world.checksum
    );
}

#[then("the checksum outcome is skipped for \"{architecture}\"")]
fn then_checksum_skipped(world: &mut PipelineWorld, architecture: String) {
    assert_eq!(
        world.checksum,
        Some(ChecksumOutcome::Skipped { architecture })
    );
}

#[then("the run fails with a checksum mismatch")]
fn then_checksum_mismatch(world: &mut PipelineWorld) {
    let err = world.error();
    assert!(
        matches!(err, InstallerError::Checksum(ChecksumError::Mismatch { .. })),
        "got {err:?}"
    );
}

#[then("the run fails with an invalid signature")]
fn then_invalid_signature(world: &mut PipelineWorld) {
    let err = world.error();
    assert!(
        matches!(err, InstallerError::Signature(SignatureError::Invalid { .. })),
        "got {err:?}"
    );
}

#[then("the run fails because trust material is missing")]
fn then_missing_trust_material(world: &mut PipelineWorld) {
    let err = world.error();
    assert!(
        matches!(
            err,
            InstallerError::Signature(SignatureError::MissingTrustMaterial { .. })
        ),
        "got {err:?}"
    );
    assert!(err.to_string().contains("missing trust material"));
}

#[then("the bundle setup command never ran")]
fn then_setup_never_ran(world: &mut PipelineWorld) {
    let script = world.script();
    assert!(
        world
            .commands
            .iter()
            .all(|command| !command.starts_with(script.as_str())),
        "bundle was executed: {:?}",
        world.commands
    );
    assert!(!world.config.bundle.marker_path.exists());
}

#[then("the pipeline stage is \"{stage}\"")]
fn then_stage_is(world: &mut PipelineWorld, stage: String) {
    let actual = world.stage.expect("pipeline ran");
    assert_eq!(actual.to_string(), stage);
}

#[then("the bundle marker records \"{version}\"")]
fn then_marker_records(world: &mut PipelineWorld, version: String) {
    let marker = std::fs::read_to_string(&world.config.bundle.marker_path).expect("marker");
    assert_eq!(marker.trim_end(), version);
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Matching verifier is installed and executable"
)]
fn scenario_matching_verifier(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Tampered verifier is never made executable"
)]
fn scenario_tampered_verifier(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Unpinned architecture is installed unverified"
)]
fn scenario_unpinned_architecture(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Signed bundle is installed"
)]
fn scenario_signed_bundle(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Bundle with a rejected signature is never run"
)]
fn scenario_rejected_signature(world: PipelineWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap_pipeline.feature",
    name = "Missing trust material is reported before verification"
)]
fn scenario_missing_trust_material(world: PipelineWorld) {
    let _ = world;
}
