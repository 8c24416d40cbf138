//! Artefact download over HTTP.
//!
//! Provides a trait-based abstraction for streaming a URL to a local file,
//! enabling dependency injection for testing. A single attempt is made per
//! call; callers decide whether a failure is fatal.

use std::path::Path;
use std::time::Duration;

/// Trait for downloading an artefact from a URL to a local path.
///
/// On success `dest` holds exactly the response body. On failure a partial
/// file may remain at `dest`; callers must not verify or execute it.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::time::Duration;
/// use km_installer::artefact::download::{ArtefactFetcher, HttpFetcher};
///
/// let fetcher = HttpFetcher::new(Duration::from_secs(30), Duration::from_secs(900));
/// fetcher.download(
///     "https://github.com/KiraCore/tools/releases/download/v0.3.42/bash-utils.sh",
///     Path::new("bash-utils.sh"),
/// )?;
/// # Ok::<(), km_installer::artefact::download::DownloadError>(())
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArtefactFetcher {
    /// Download `url` into `dest`, creating or truncating the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server answers with a
    /// non-success status, or the file cannot be written.
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

/// Errors arising from artefact download operations.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request failed.
    #[error("download failed for {url}: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The requested artefact was not found (HTTP 404).
    #[error("artefact not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP-based fetcher using a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Create a fetcher that gives up on an unresponsive server after
    /// `response_timeout` and on a stalled body after `body_timeout`.
    ///
    /// The two bounds are separate so that a large artefact still arriving
    /// over a slow link is not cut off by the response deadline.
    #[must_use]
    pub fn new(response_timeout: Duration, body_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_resolve(Some(response_timeout))
            .timeout_connect(Some(response_timeout))
            .timeout_send_request(Some(response_timeout))
            .timeout_recv_response(Some(response_timeout))
            .timeout_recv_body(Some(body_timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl ArtefactFetcher for HttpFetcher {
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        log::trace!("GET {url} -> {}", dest.display());
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Build a `ureq` agent whose every request, body included, is bounded by
/// `timeout`. Suits small API responses, not artefact transfers.
pub(crate) fn http_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    ureq::Agent::new_with_config(config)
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404) => DownloadError::NotFound {
            url: url.to_owned(),
        },
        other => DownloadError::HttpError {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
