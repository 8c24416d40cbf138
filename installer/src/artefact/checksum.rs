//! Pinned checksum gate.
//!
//! Compares the SHA-256 digest of a downloaded file with the digest pinned
//! for the host architecture. An architecture with no pinned digest is
//! reported as [`ChecksumOutcome::Skipped`] rather than as a failure: the
//! file is *not* verified in that case, and callers that need a hard
//! guarantee must check the outcome.

use super::sha256_digest::Sha256Digest;
use crate::config::PinnedHashes;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Successful results of [`check_hash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    /// The file digest equals the pinned digest.
    Verified {
        /// The matching digest.
        digest: Sha256Digest,
    },
    /// No digest is pinned for the architecture, so nothing was compared.
    Skipped {
        /// The architecture that had no pinned digest.
        architecture: String,
    },
}

/// Errors raised by the checksum gate.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The file digest differs from the pinned digest.
    #[error(
        "digest of {} does not match the {architecture} pin: expected {expected}, got {actual}",
        path.display()
    )]
    Mismatch {
        /// The file that was hashed.
        path: PathBuf,
        /// Architecture whose pin was used.
        architecture: String,
        /// The pinned digest.
        expected: String,
        /// The computed digest.
        actual: String,
    },

    /// The file could not be read.
    #[error("failed to read {} for hashing: {source}", path.display())]
    Read {
        /// The file that was hashed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Compute the SHA-256 digest of a file.
///
/// Reads the file at `path` in chunks.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn compute_sha256(path: &Path) -> io::Result<Sha256Digest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(Sha256Digest::from_hasher(hasher))
}

/// Check the file at `path` against the digest pinned for `architecture`.
///
/// The pin is looked up before the file is read, so an unpinned architecture
/// never touches the file.
///
/// # Errors
///
/// Returns [`ChecksumError::Mismatch`] when the digests differ and
/// [`ChecksumError::Read`] when the file cannot be hashed.
///
/// # Examples
///
/// ```
/// use km_installer::artefact::checksum::{ChecksumOutcome, check_hash};
/// use km_installer::artefact::sha256_digest::Sha256Digest;
/// use km_installer::config::PinnedHashes;
///
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("cosign-linux-amd64");
/// std::fs::write(&path, b"cosign")?;
///
/// let digest = Sha256Digest::of_bytes(b"cosign");
/// let pinned = PinnedHashes::from_hex(&[("amd64", digest.as_str())])?;
///
/// let outcome = check_hash(&path, "amd64", &pinned)?;
/// assert!(matches!(outcome, ChecksumOutcome::Verified { .. }));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn check_hash(
    path: &Path,
    architecture: &str,
    pinned: &PinnedHashes,
) -> Result<ChecksumOutcome, ChecksumError> {
    let Some(expected) = pinned.expected_for(architecture) else {
        log::warn!(
            "no pinned digest for architecture {architecture}; {} was not checksum-verified",
            path.display()
        );
        return Ok(ChecksumOutcome::Skipped {
            architecture: architecture.to_owned(),
        });
    };

    let actual = compute_sha256(path).map_err(|source| ChecksumError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if &actual != expected {
        return Err(ChecksumError::Mismatch {
            path: path.to_path_buf(),
            architecture: architecture.to_owned(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }

    log::debug!("{} matches the {architecture} pin", path.display());
    Ok(ChecksumOutcome::Verified { digest: actual })
}
