//! Bootstrap configuration and host platform detection.
//!
//! Every path, version, URL, and pinned digest a run depends on lives in one
//! immutable [`BootstrapConfig`]. It is built once in `main` and passed by
//! reference to each component, so there is a single source of truth and no
//! global mutable state.

use crate::artefact::sha256_digest::Sha256Digest;
use crate::error::{InstallerError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Base-image version used when none is requested on the command line.
pub const DEFAULT_BASE_IMAGE_VERSION: &str = "v0.13.7";

const BASE_IMAGE_REPOSITORY: &str = "ghcr.io/kiracore/docker/base-image";
const KEYS_DIR: &str = "/usr/keys";
const TRUST_ANCHOR_FILE: &str = "kira-cosign.pub";

const COSIGN_COMMAND: &str = "cosign";
const COSIGN_VERSION: &str = "v2.0.0";
const COSIGN_RELEASE_URL: &str = "https://github.com/sigstore/cosign/releases/download";
const COSIGN_INSTALL_PATH: &str = "/usr/local/bin/cosign";
const COSIGN_SHA256_AMD64: &str =
    "169a53594c437d53ffc401b911b7e70d453f5a2c1f96eb2a736f34f6356c4f2b";
const COSIGN_SHA256_ARM64: &str =
    "8132cb2fb99a4c60ba8e03b079e12462c27073028a5d08c07ecda67284e0c88d";

const TOOLS_VERSION: &str = "v0.3.42";
const TOOLS_RELEASE_URL: &str = "https://github.com/KiraCore/tools/releases/download";
const BUNDLE_NAME: &str = "bash-utils.sh";
const BUNDLE_SETUP_COMMAND: &str = "bashUtilsSetup";
const BUNDLE_INSTALL_DIR: &str = "/var/kiraglob";
const BUNDLE_MARKER_FILE: &str = ".km-installer-bash-utils";

const WORK_DIR: &str = "/var/tmp/km-installer";
const REPOSITORY_OWNER: &str = "KiraCore";
const DECLARED_REPOSITORIES: [&str; 2] = ["sekai", "interx"];
const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const KIRA_COSIGN_PUB: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE/IrzBQYeMwvKa44/DF/HB7XDpnE+
f+mU9F/Qbfq25bBWV2+NlYMJv3KvKHNtu3Jknt6yizZjUV4b8WGfKBzFYw==
-----END PUBLIC KEY-----
";

/// The PEM-encoded public key every signature is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustAnchor {
    pem: &'static str,
}

impl TrustAnchor {
    /// The key compiled into the installer.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            pem: KIRA_COSIGN_PUB,
        }
    }

    /// Return the PEM text.
    #[must_use]
    pub const fn pem(&self) -> &'static str {
        self.pem
    }
}

/// Expected SHA-256 digests of one artefact build, keyed by architecture.
///
/// Architectures missing from the table are not verified at all; see
/// [`crate::artefact::checksum::check_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PinnedHashes {
    digests: BTreeMap<String, Sha256Digest>,
}

impl PinnedHashes {
    /// Build a table from `(architecture, hex digest)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidPinnedDigest`] if any digest is not
    /// 64 lowercase hex characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use km_installer::config::PinnedHashes;
    ///
    /// let digest = "a".repeat(64);
    /// let pinned = PinnedHashes::from_hex(&[("amd64", digest.as_str())])?;
    /// assert!(pinned.expected_for("amd64").is_some());
    /// assert!(pinned.expected_for("arm64").is_none());
    /// # Ok::<(), km_installer::error::InstallerError>(())
    /// ```
    pub fn from_hex(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut digests = BTreeMap::new();
        for (architecture, hex) in pairs {
            let digest = Sha256Digest::try_from(*hex).map_err(|source| {
                InstallerError::InvalidPinnedDigest {
                    architecture: (*architecture).to_owned(),
                    source,
                }
            })?;
            digests.insert((*architecture).to_owned(), digest);
        }
        Ok(Self { digests })
    }

    /// Return the pinned digest for `architecture`, if one exists.
    #[must_use]
    pub fn expected_for(&self, architecture: &str) -> Option<&Sha256Digest> {
        self.digests.get(architecture)
    }

    /// Iterate over the architectures that have a pinned digest.
    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.digests.keys().map(String::as_str)
    }
}

/// Operating system and normalised CPU architecture of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    /// Operating system identifier, e.g. `linux`.
    pub os: String,
    /// Release architecture identifier, e.g. `amd64` or `arm64`.
    pub architecture: String,
}

impl HostPlatform {
    /// Construct a platform from raw identifiers, normalising the architecture.
    #[must_use]
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_owned(),
            architecture: normalise_architecture(architecture),
        }
    }

    /// Detect the platform this binary was compiled for.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.architecture)
    }
}

/// Map a Rust or release architecture name onto the release naming scheme.
///
/// `aarch64` and any `arm*` name become `arm64`; `x86_64` becomes `amd64`.
/// Anything else is passed through unchanged and will have no pinned digest.
///
/// # Examples
///
/// ```
/// use km_installer::config::normalise_architecture;
///
/// assert_eq!(normalise_architecture("x86_64"), "amd64");
/// assert_eq!(normalise_architecture("aarch64"), "arm64");
/// assert_eq!(normalise_architecture("riscv64"), "riscv64");
/// ```
#[must_use]
pub fn normalise_architecture(raw: &str) -> String {
    if raw == "aarch64" || raw.starts_with("arm") {
        "arm64".to_owned()
    } else if raw == "x86_64" {
        "amd64".to_owned()
    } else {
        raw.to_owned()
    }
}

/// A fixed external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Borrow the arguments as string slices.
    #[must_use]
    pub fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the signature verifier comes from and where it is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierToolConfig {
    /// Command used to invoke the verifier once installed.
    pub command: String,
    /// Pinned release version.
    pub version: String,
    /// Base URL of the release download area.
    pub release_url: String,
    /// Canonical install location of the executable.
    pub install_path: Utf8PathBuf,
    /// Expected digests of the release binary per architecture.
    pub pinned: PinnedHashes,
}

impl VerifierToolConfig {
    /// Release asset name for `platform`, e.g. `cosign-linux-amd64`.
    #[must_use]
    pub fn asset_name(&self, platform: &HostPlatform) -> String {
        format!(
            "{}-{}-{}",
            self.command, platform.os, platform.architecture
        )
    }

    /// Download URL of the release asset for `platform`.
    #[must_use]
    pub fn download_url(&self, platform: &HostPlatform) -> String {
        format!(
            "{}/{}/{}",
            self.release_url,
            self.version,
            self.asset_name(platform)
        )
    }
}

/// The signed tooling bundle and how it is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleConfig {
    /// Release asset name of the bundle script.
    pub name: String,
    /// Pinned release version.
    pub version: String,
    /// Base URL of the release download area.
    pub release_url: String,
    /// Arguments passed to the bundle to perform its own setup.
    pub setup_args: Vec<String>,
    /// Command that reloads shell profile state after setup.
    pub profile_reload: CommandSpec,
    /// Marker recording the installed bundle version.
    pub marker_path: Utf8PathBuf,
}

impl BundleConfig {
    /// File name of the detached signature.
    #[must_use]
    pub fn signature_name(&self) -> String {
        format!("{}.sig", self.name)
    }

    /// Download URL of the bundle.
    #[must_use]
    pub fn download_url(&self) -> String {
        format!("{}/{}/{}", self.release_url, self.version, self.name)
    }

    /// Download URL of the detached signature.
    #[must_use]
    pub fn signature_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.release_url,
            self.version,
            self.signature_name()
        )
    }
}

/// Immutable configuration for one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Directory holding trust material.
    pub keys_dir: Utf8PathBuf,
    /// Path the trust anchor is written to.
    pub trust_anchor_path: Utf8PathBuf,
    /// The embedded public key.
    pub trust_anchor: TrustAnchor,
    /// Signature verifier tool settings.
    pub verifier: VerifierToolConfig,
    /// Tooling bundle settings.
    pub bundle: BundleConfig,
    /// Directory downloads are staged in before verification.
    pub work_dir: Utf8PathBuf,
    /// Repository of the base container image.
    pub base_image_repository: String,
    /// Owner of the declared release repositories.
    pub repository_owner: String,
    /// Release repositories whose packages may be prepared.
    pub repositories: Vec<String>,
    /// Upper bound on connecting and on waiting for response headers, and
    /// on every release query as a whole.
    pub network_timeout: Duration,
    /// Upper bound on streaming one artefact body to disk.
    pub transfer_timeout: Duration,
}

impl BootstrapConfig {
    /// The production configuration with well-known system paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a compiled-in digest is malformed.
    pub fn production() -> Result<Self> {
        Self::rooted_at(Utf8Path::new("/"))
    }

    /// The production configuration with every filesystem path moved under
    /// `root`. Used for sandboxed runs.
    ///
    /// # Errors
    ///
    /// Returns an error if a compiled-in digest is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use km_installer::config::BootstrapConfig;
    ///
    /// let config = BootstrapConfig::rooted_at(Utf8Path::new("/tmp/sandbox"))?;
    /// assert_eq!(config.trust_anchor_path, "/tmp/sandbox/usr/keys/kira-cosign.pub");
    /// # Ok::<(), km_installer::error::InstallerError>(())
    /// ```
    pub fn rooted_at(root: &Utf8Path) -> Result<Self> {
        let under = |path: &str| root.join(path.trim_start_matches('/'));
        let keys_dir = under(KEYS_DIR);
        let pinned = PinnedHashes::from_hex(&[
            ("amd64", COSIGN_SHA256_AMD64),
            ("arm64", COSIGN_SHA256_ARM64),
        ])?;

        Ok(Self {
            trust_anchor_path: keys_dir.join(TRUST_ANCHOR_FILE),
            keys_dir,
            trust_anchor: TrustAnchor::embedded(),
            verifier: VerifierToolConfig {
                command: COSIGN_COMMAND.to_owned(),
                version: COSIGN_VERSION.to_owned(),
                release_url: COSIGN_RELEASE_URL.to_owned(),
                install_path: under(COSIGN_INSTALL_PATH),
                pinned,
            },
            bundle: BundleConfig {
                name: BUNDLE_NAME.to_owned(),
                version: TOOLS_VERSION.to_owned(),
                release_url: TOOLS_RELEASE_URL.to_owned(),
                setup_args: vec![
                    BUNDLE_SETUP_COMMAND.to_owned(),
                    under(BUNDLE_INSTALL_DIR).into_string(),
                ],
                profile_reload: CommandSpec {
                    program: "bash".to_owned(),
                    args: vec!["-c".to_owned(), ". /etc/profile".to_owned()],
                },
                marker_path: under(BUNDLE_INSTALL_DIR).join(BUNDLE_MARKER_FILE),
            },
            work_dir: under(WORK_DIR),
            base_image_repository: BASE_IMAGE_REPOSITORY.to_owned(),
            repository_owner: REPOSITORY_OWNER.to_owned(),
            repositories: DECLARED_REPOSITORIES.map(str::to_owned).to_vec(),
            network_timeout: NETWORK_TIMEOUT,
            transfer_timeout: TRANSFER_TIMEOUT,
        })
    }

    /// Release package name for `repository` on `platform`.
    ///
    /// # Examples
    ///
    /// ```
    /// use km_installer::config::{BootstrapConfig, HostPlatform};
    ///
    /// let config = BootstrapConfig::production()?;
    /// let platform = HostPlatform::new("linux", "x86_64");
    /// assert_eq!(config.release_asset_name("sekai", &platform), "sekai-linux-amd64.deb");
    /// # Ok::<(), km_installer::error::InstallerError>(())
    /// ```
    #[must_use]
    pub fn release_asset_name(&self, repository: &str, platform: &HostPlatform) -> String {
        format!("{repository}-{}-{}.deb", platform.os, platform.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn production_config_pins_both_release_architectures() {
        let config = BootstrapConfig::production().expect("compiled-in digests are valid");
        let pinned: Vec<_> = config.verifier.pinned.architectures().collect();
        assert_eq!(pinned, vec!["amd64", "arm64"]);
    }

    #[test]
    fn production_paths_are_well_known() {
        let config = BootstrapConfig::production().expect("config");
        assert_eq!(config.trust_anchor_path, "/usr/keys/kira-cosign.pub");
        assert_eq!(config.verifier.install_path, "/usr/local/bin/cosign");
        assert_eq!(
            config.bundle.setup_args,
            vec!["bashUtilsSetup".to_owned(), "/var/kiraglob".to_owned()]
        );
    }

    #[test]
    fn rooted_config_moves_every_path() {
        let root = Utf8Path::new("/sandbox");
        let config = BootstrapConfig::rooted_at(root).expect("config");
        for path in [
            &config.keys_dir,
            &config.trust_anchor_path,
            &config.verifier.install_path,
            &config.bundle.marker_path,
            &config.work_dir,
        ] {
            assert!(path.starts_with(root), "{path} escapes the sandbox root");
        }
    }

    #[rstest]
    #[case::x86_64("x86_64", "amd64")]
    #[case::aarch64("aarch64", "arm64")]
    #[case::arm("arm", "arm64")]
    #[case::release_name("amd64", "amd64")]
    #[case::unknown("riscv64", "riscv64")]
    fn architectures_normalise_to_release_names(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalise_architecture(raw), expected);
    }

    #[test]
    fn verifier_url_uses_version_and_platform() {
        let config = BootstrapConfig::production().expect("config");
        let platform = HostPlatform::new("linux", "aarch64");
        assert_eq!(
            config.verifier.download_url(&platform),
            "https://github.com/sigstore/cosign/releases/download/v2.0.0/cosign-linux-arm64"
        );
    }

    #[test]
    fn bundle_signature_sits_beside_bundle() {
        let config = BootstrapConfig::production().expect("config");
        assert_eq!(config.bundle.signature_name(), "bash-utils.sh.sig");
        assert_eq!(
            config.bundle.signature_url(),
            format!("{}.sig", config.bundle.download_url())
        );
    }

    #[test]
    fn malformed_pinned_digest_is_rejected() {
        let err = PinnedHashes::from_hex(&[("amd64", "not-a-digest")])
            .expect_err("digest should be rejected");
        assert!(matches!(
            err,
            InstallerError::InvalidPinnedDigest { ref architecture, .. } if architecture == "amd64"
        ));
    }

    #[test]
    fn command_spec_displays_full_command_line() {
        let spec = CommandSpec {
            program: "bash".to_owned(),
            args: vec!["-c".to_owned(), ". /etc/profile".to_owned()],
        };
        assert_eq!(spec.to_string(), "bash -c . /etc/profile");
    }
}
