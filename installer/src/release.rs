//! Release index queries against the GitHub REST API.
//!
//! The index answers two questions: what is the latest release of a
//! repository, and which assets does a tagged release publish. Failures are
//! classified so callers can tell authentication problems from missing
//! releases and rate limiting.

use crate::artefact::download::{ArtefactFetcher, http_agent};
use crate::error::{InstallerError, Result};
use crate::resolver::{RepositoryId, RepositoryRef};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("km-installer/", env!("CARGO_PKG_VERSION"));

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// The release tag, e.g. `v1.0.0`.
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Downloadable assets attached to the release.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Find an asset by exact file name.
    #[must_use]
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// Direct download URL.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// Errors raised while querying the release index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    /// The credential was rejected.
    #[error("{repository}: release index rejected the credential")]
    Unauthorized {
        /// `owner/name` of the queried repository.
        repository: String,
    },

    /// The repository or release does not exist.
    #[error("{repository}: release not found")]
    NotFound {
        /// `owner/name` (and tag, if any) of the queried release.
        repository: String,
    },

    /// The index refused the request because of rate limiting.
    #[error("{repository}: release index rate limit exceeded")]
    RateLimited {
        /// `owner/name` of the queried repository.
        repository: String,
    },

    /// The request failed in transit or with an unexpected status.
    #[error("{repository}: release query failed: {reason}")]
    Transport {
        /// `owner/name` of the queried repository.
        repository: String,
        /// Description of the failure.
        reason: String,
    },

    /// The response body was not a release document.
    #[error("{repository}: malformed release response: {reason}")]
    Decode {
        /// `owner/name` of the queried repository.
        repository: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// The release exists but does not publish the requested asset.
    #[error("{repository}: release {tag} has no asset named {asset}")]
    AssetMissing {
        /// `owner/name` of the queried repository.
        repository: String,
        /// Tag of the release that was searched.
        tag: String,
        /// The asset file name that was expected.
        asset: String,
    },
}

/// Source of release metadata.
///
/// Implementations are shared across resolver threads, so they must be
/// `Send + Sync` and must not hold per-request state.
#[cfg_attr(test, mockall::automock)]
pub trait ReleaseIndex: Send + Sync {
    /// Return the latest published release of `repo`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReleaseError`] describing why the query failed.
    fn latest_release(&self, repo: &RepositoryId) -> std::result::Result<Release, ReleaseError>;

    /// Return the release of `repo` tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns a [`ReleaseError`] describing why the query failed.
    fn release_by_tag(
        &self,
        repo: &RepositoryId,
        tag: &str,
    ) -> std::result::Result<Release, ReleaseError>;
}

/// Release index backed by `api.github.com`.
///
/// One agent and one credential are shared by every query.
pub struct GitHubReleaseIndex {
    agent: ureq::Agent,
    authorization: Option<String>,
}

impl GitHubReleaseIndex {
    /// Create an index authenticating with `credential`, if given.
    #[must_use]
    pub fn new(credential: Option<&str>, timeout: Duration) -> Self {
        Self {
            agent: http_agent(timeout),
            authorization: credential
                .filter(|token| !token.is_empty())
                .map(|token| format!("Bearer {token}")),
        }
    }

    fn get(&self, repo: &RepositoryId, path: &str) -> std::result::Result<Release, ReleaseError> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/releases/{path}",
            repo.owner, repo.name
        );
        log::trace!("GET {url}");
        let mut request = self
            .agent
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);
        if let Some(authorization) = &self.authorization {
            request = request.header("Authorization", authorization.as_str());
        }

        let response = request.call().map_err(|err| classify(repo, &err))?;
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|err| ReleaseError::Transport {
                repository: repo.to_string(),
                reason: err.to_string(),
            })?;
        parse_release(repo, &body)
    }
}

impl ReleaseIndex for GitHubReleaseIndex {
    fn latest_release(&self, repo: &RepositoryId) -> std::result::Result<Release, ReleaseError> {
        self.get(repo, "latest")
    }

    fn release_by_tag(
        &self,
        repo: &RepositoryId,
        tag: &str,
    ) -> std::result::Result<Release, ReleaseError> {
        self.get(repo, &format!("tags/{tag}"))
    }
}

fn parse_release(repo: &RepositoryId, body: &str) -> std::result::Result<Release, ReleaseError> {
    serde_json::from_str(body).map_err(|err| ReleaseError::Decode {
        repository: repo.to_string(),
        reason: err.to_string(),
    })
}

fn classify(repo: &RepositoryId, err: &ureq::Error) -> ReleaseError {
    let repository = repo.to_string();
    match err {
        ureq::Error::StatusCode(401) => ReleaseError::Unauthorized { repository },
        ureq::Error::StatusCode(404) => ReleaseError::NotFound { repository },
        ureq::Error::StatusCode(403 | 429) => ReleaseError::RateLimited { repository },
        other => ReleaseError::Transport {
            repository,
            reason: other.to_string(),
        },
    }
}

/// Download the asset named `asset_name` from the release `repo` is pinned
/// to into `dest_dir`, returning the local path.
///
/// A repository without a pinned version uses its latest release. Any
/// failure is fatal here, unlike during resolution.
///
/// # Errors
///
/// Returns [`InstallerError::Release`] if the release cannot be fetched or
/// lacks the asset, and [`InstallerError::Download`] if the transfer fails.
pub fn fetch_release_asset(
    index: &dyn ReleaseIndex,
    fetcher: &dyn ArtefactFetcher,
    repo: &RepositoryRef,
    asset_name: &str,
    dest_dir: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let release = repo.pinned_version.as_deref().map_or_else(
        || index.latest_release(&repo.id),
        |tag| index.release_by_tag(&repo.id, tag),
    )?;
    let asset = release
        .asset(asset_name)
        .ok_or_else(|| ReleaseError::AssetMissing {
            repository: repo.id.to_string(),
            tag: release.tag.clone(),
            asset: asset_name.to_owned(),
        })?;

    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(&asset.name);
    fetcher
        .download(&asset.download_url, dest.as_std_path())
        .map_err(|source| InstallerError::Download {
            artefact: asset.name.clone(),
            source,
        })?;
    log::debug!("downloaded {} {} to {dest}", repo.id, release.tag);
    Ok(dest)
}
