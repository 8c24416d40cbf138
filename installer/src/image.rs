//! Base-image trust gate and pull.
//!
//! An image is pulled only after its signature has been verified against the
//! trust anchor. A verifier that cannot run, or that reports anything but a
//! clean verification, stops the run before the pull is attempted.

use crate::command::{CommandExecutor, command_line, describe_status};
use crate::error::{InstallerError, Result};
use std::fmt;
use std::path::Path;

/// A container image `repository:tag` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry and repository path.
    pub repository: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Create a reference from its parts.
    #[must_use]
    pub fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Checks a container image signature against a public key.
#[cfg_attr(test, mockall::automock)]
pub trait ImageVerifier {
    /// Return `Ok(true)` only if the verifier executable at `tool` reports a
    /// valid signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier cannot be run at all.
    fn verify(&self, tool: &Path, image: &ImageReference, public_key: &Path) -> Result<bool>;
}

/// Makes a container image available locally.
#[cfg_attr(test, mockall::automock)]
pub trait ImagePuller {
    /// Pull `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn pull(&self, image: &ImageReference) -> Result<()>;
}

/// Image verification through `cosign verify`.
pub struct CosignImageVerifier<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> CosignImageVerifier<'a> {
    /// Create a verifier running cosign through `executor`.
    #[must_use]
    pub const fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }
}

impl ImageVerifier for CosignImageVerifier<'_> {
    fn verify(&self, tool: &Path, image: &ImageReference, public_key: &Path) -> Result<bool> {
        let command = tool.to_string_lossy();
        let key = public_key.to_string_lossy();
        let reference = image.to_string();
        let output = self
            .executor
            .run(&command, &["verify", "--key", key.as_ref(), &reference])?;
        if !output.status.success() {
            log::debug!(
                "{command} rejected {reference}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.status.success())
    }
}

/// Image pulls through the container engine CLI.
pub struct EnginePuller<'a> {
    executor: &'a dyn CommandExecutor,
    engine: String,
}

impl<'a> EnginePuller<'a> {
    /// Create a puller invoking `engine pull` through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, engine: impl Into<String>) -> Self {
        Self {
            executor,
            engine: engine.into(),
        }
    }
}

impl ImagePuller for EnginePuller<'_> {
    fn pull(&self, image: &ImageReference) -> Result<()> {
        let reference = image.to_string();
        let args = ["pull", reference.as_str()];
        let status = self.executor.run_attached(&self.engine, &args)?;
        if status.success() {
            return Ok(());
        }
        Err(InstallerError::ImagePull {
            image: reference.clone(),
            reason: format!(
                "`{}` exited with {}",
                command_line(&self.engine, &args),
                describe_status(status)
            ),
        })
    }
}

/// Require `verifier`, running the executable at `tool`, to approve `image`
/// against `public_key`.
///
/// # Errors
///
/// Returns [`InstallerError::ImageTrust`] when verification reports `false`
/// or cannot be performed.
pub fn approve_image(
    verifier: &dyn ImageVerifier,
    tool: &Path,
    image: &ImageReference,
    public_key: &Path,
) -> Result<()> {
    match verifier.verify(tool, image, public_key) {
        Ok(true) => {
            log::debug!("{image} approved");
            Ok(())
        }
        Ok(false) => Err(InstallerError::ImageTrust {
            image: image.to_string(),
            reason: "signature did not verify against the trust anchor".to_owned(),
        }),
        Err(err) => Err(InstallerError::ImageTrust {
            image: image.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Verify `image` and pull it only once it is approved.
///
/// # Errors
///
/// Returns [`InstallerError::ImageTrust`] without pulling when verification
/// fails, or the puller's error when the pull itself fails.
pub fn approve_and_pull(
    verifier: &dyn ImageVerifier,
    puller: &dyn ImagePuller,
    tool: &Path,
    image: &ImageReference,
    public_key: &Path,
) -> Result<()> {
    approve_image(verifier, tool, image, public_key)?;
    puller.pull(image)
}
