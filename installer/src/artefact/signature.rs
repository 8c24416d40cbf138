//! Detached signature gate.
//!
//! A downloaded artefact is trusted only when its detached signature verifies
//! against the trust anchor on disk. Verification is delegated to the
//! signature verifier installed by the pipeline.

use crate::command::{CommandExecutor, command_line, describe_status};
use std::path::{Path, PathBuf};

/// Errors raised by the signature gate.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The public key to verify against does not exist.
    #[error("missing trust material: public key not found at {}", path.display())]
    MissingTrustMaterial {
        /// Expected location of the public key.
        path: PathBuf,
    },

    /// The verifier rejected the signature.
    #[error(
        "{} does not match signature {} ({status}): {stderr}",
        artefact.display(),
        signature.display()
    )]
    Invalid {
        /// The artefact that was checked.
        artefact: PathBuf,
        /// The detached signature file.
        signature: PathBuf,
        /// Human-readable verifier exit status.
        status: String,
        /// Verifier diagnostics.
        stderr: String,
    },

    /// The verifier could not be run.
    #[error("could not run `{command}`: {reason}")]
    Launch {
        /// The verifier command line.
        command: String,
        /// Description of the launch failure.
        reason: String,
    },
}

/// Verifies an artefact against a detached signature and public key.
#[cfg_attr(test, mockall::automock)]
pub trait DetachedVerifier {
    /// Succeed only if `signature` is a valid signature of `artefact` under
    /// `public_key`, as judged by the verifier executable at `tool`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] when the key is missing, the verifier cannot
    /// run, or the signature does not verify.
    fn verify_detached(
        &self,
        tool: &Path,
        artefact: &Path,
        signature: &Path,
        public_key: &Path,
    ) -> Result<(), SignatureError>;
}

/// Detached verification through `cosign verify-blob`.
///
/// The cosign executable is supplied per call, so the gate always runs the
/// binary the pipeline prepared rather than whatever `PATH` resolves.
pub struct CosignBlobVerifier<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> CosignBlobVerifier<'a> {
    /// Create a verifier running cosign through `executor`.
    #[must_use]
    pub const fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }
}

impl DetachedVerifier for CosignBlobVerifier<'_> {
    fn verify_detached(
        &self,
        tool: &Path,
        artefact: &Path,
        signature: &Path,
        public_key: &Path,
    ) -> Result<(), SignatureError> {
        if !public_key.is_file() {
            return Err(SignatureError::MissingTrustMaterial {
                path: public_key.to_path_buf(),
            });
        }

        let command = tool.to_string_lossy();
        let key = public_key.to_string_lossy();
        let sig = signature.to_string_lossy();
        let blob = artefact.to_string_lossy();
        let args = [
            "verify-blob",
            "--key",
            key.as_ref(),
            "--signature",
            sig.as_ref(),
            blob.as_ref(),
        ];

        let output = self
            .executor
            .run(&command, &args)
            .map_err(|err| SignatureError::Launch {
                command: command_line(&command, &args),
                reason: err.to_string(),
            })?;

        if output.status.success() {
            log::debug!("{} verified against {}", artefact.display(), public_key.display());
            return Ok(());
        }

        Err(SignatureError::Invalid {
            artefact: artefact.to_path_buf(),
            signature: signature.to_path_buf(),
            status: describe_status(output.status),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
