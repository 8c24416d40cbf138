//! Error types for the KIRA bootstrap installer.
//!
//! Every fatal failure in a run surfaces as an [`InstallerError`]. Variants are
//! grouped by the gate or step that failed so the operator can tell from the
//! message alone whether image trust, a checksum, a detached signature, or a
//! subprocess stopped the run.

use crate::artefact::checksum::ChecksumError;
use crate::artefact::download::DownloadError;
use crate::artefact::error::ArtefactError;
use crate::artefact::signature::SignatureError;
use crate::pipeline::InstallStage;
use crate::release::ReleaseError;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur during a bootstrap run.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// The requested base-image version is not a semantic version.
    #[error("invalid base image version \"{value}\": {reason}")]
    InvalidImageVersion {
        /// The rejected version string.
        value: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// The base image signature could not be verified against the trust anchor.
    #[error("image trust verification failed for {image}: {reason}")]
    ImageTrust {
        /// The image reference that was checked.
        image: String,
        /// Description of the verification failure.
        reason: String,
    },

    /// Pulling an approved image failed.
    #[error("image pull failed for {image}: {reason}")]
    ImagePull {
        /// The image reference that was pulled.
        image: String,
        /// Description of the pull failure.
        reason: String,
    },

    /// A release lookup needed for a specific download failed.
    #[error("release lookup failed: {0}")]
    Release(#[from] ReleaseError),

    /// Downloading an artefact failed.
    #[error("download of {artefact} failed: {source}")]
    Download {
        /// Name of the artefact being downloaded.
        artefact: String,
        /// The underlying download failure.
        #[source]
        source: DownloadError,
    },

    /// A downloaded artefact did not match its pinned digest.
    #[error("checksum verification failed: {0}")]
    Checksum(#[from] ChecksumError),

    /// A downloaded artefact did not match its detached signature.
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    /// An external command could not be started.
    #[error("failed to launch `{command}`: {source}")]
    CommandLaunch {
        /// The command line that was attempted.
        command: String,
        /// The spawn error.
        #[source]
        source: std::io::Error,
    },

    /// An external command ran but exited unsuccessfully.
    #[error("command `{command}` failed with {status}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Human-readable exit status.
        status: String,
    },

    /// The trust anchor could not be written to disk.
    #[error("failed to write trust material to {path}: {source}")]
    TrustMaterial {
        /// Destination of the public key.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A verified artefact could not be made executable or moved into place.
    #[error("failed to install {path}: {reason}")]
    Install {
        /// The path being installed.
        path: Utf8PathBuf,
        /// Description of the filesystem failure.
        reason: String,
    },

    /// A pipeline step was requested before its prerequisite step completed.
    #[error("install pipeline out of order: expected stage {expected}, found {actual}")]
    StageOrder {
        /// The stage the step requires.
        expected: InstallStage,
        /// The stage the pipeline is actually in.
        actual: InstallStage,
    },

    /// The process is not running with the privileges the install needs.
    #[error("insufficient privileges: {reason}")]
    InsufficientPrivileges {
        /// Description of the privilege problem.
        reason: String,
    },

    /// A pinned digest in the configuration is malformed.
    #[error("invalid pinned digest for {architecture}: {source}")]
    InvalidPinnedDigest {
        /// Architecture the digest is pinned for.
        architecture: String,
        /// The validation failure.
        #[source]
        source: ArtefactError,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Test stub received an unexpected or mismatched command invocation.
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub mismatch: {message}")]
    StubMismatch {
        /// Description of what was expected versus what was received.
        message: String,
    },
}

/// Result type alias using [`InstallerError`].
pub type Result<T> = std::result::Result<T, InstallerError>;
