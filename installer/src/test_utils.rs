//! Shared test utilities for the installer crate.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! behaviour suites under `tests/`.

use crate::artefact::download::{ArtefactFetcher, DownloadError};
use crate::command::CommandExecutor;
use crate::error::{InstallerError, Result};
use crate::release::{Release, ReleaseAsset, ReleaseError, ReleaseIndex};
use crate::resolver::RepositoryId;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The command to execute (e.g., "cosign").
    pub cmd: String,
    /// The arguments to pass to the command.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<Output>,
}

impl ExpectedCall {
    /// Build an expectation from borrowed command parts.
    #[must_use]
    pub fn new(cmd: &str, args: &[&str], result: Result<Output>) -> Self {
        Self {
            cmd: cmd.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            result,
        }
    }
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Records expected command invocations and returns predefined results,
/// allowing tests to verify command execution without side effects. Calls
/// that do not match the next expectation return
/// [`InstallerError::StubMismatch`].
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    seen: RefCell<Vec<String>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Command lines received so far, in order.
    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.borrow().clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations, {} remain",
            self.expected.borrow().len()
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        self.seen
            .borrow_mut()
            .push(crate::command::command_line(cmd, args));
        let Some(call) = self.expected.borrow_mut().pop_front() else {
            return Err(InstallerError::StubMismatch {
                message: format!("unexpected invocation of {cmd}"),
            });
        };

        if call.cmd != cmd || call.args != args {
            return Err(InstallerError::StubMismatch {
                message: format!(
                    "expected {} {:?}, got {cmd} {args:?}",
                    call.cmd, call.args
                ),
            });
        }

        call.result
    }
}

/// Compute the lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    crate::artefact::sha256_digest::Sha256Digest::of_bytes(bytes).to_string()
}

/// An in-memory fetcher serving canned bodies by URL.
///
/// URLs without a registered body fail with [`DownloadError::NotFound`].
#[derive(Debug, Default)]
pub struct StubFetcher {
    bodies: HashMap<String, Vec<u8>>,
    failures: HashMap<String, String>,
    requested: RefCell<Vec<String>>,
}

impl StubFetcher {
    /// Create a fetcher with no registered URLs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    #[must_use]
    pub fn with_body(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_owned(), body.to_vec());
        self
    }

    /// Fail requests for `url` with an HTTP error carrying `reason`.
    #[must_use]
    pub fn with_failure(mut self, url: &str, reason: &str) -> Self {
        self.failures.insert(url.to_owned(), reason.to_owned());
        self
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl ArtefactFetcher for StubFetcher {
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), DownloadError> {
        self.requested.borrow_mut().push(url.to_owned());
        if let Some(reason) = self.failures.get(url) {
            return Err(DownloadError::HttpError {
                url: url.to_owned(),
                reason: reason.clone(),
            });
        }
        let body = self.bodies.get(url).ok_or_else(|| DownloadError::NotFound {
            url: url.to_owned(),
        })?;
        std::fs::write(dest, body)?;
        Ok(())
    }
}

/// A thread-safe release index answering from a fixed table.
///
/// Repositories without an entry fail with [`ReleaseError::NotFound`]; the
/// number of queries is recorded so tests can count tasks.
#[derive(Debug, Default)]
pub struct StubReleaseIndex {
    releases: HashMap<RepositoryId, std::result::Result<Release, String>>,
    queries: AtomicUsize,
    queried: Mutex<Vec<RepositoryId>>,
}

impl StubReleaseIndex {
    /// Create an index with no releases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `tag` as the latest release of `owner/name`, with `assets`
    /// given as `(name, url)` pairs.
    #[must_use]
    pub fn with_release(
        mut self,
        owner: &str,
        name: &str,
        tag: &str,
        assets: &[(&str, &str)],
    ) -> Self {
        let release = Release {
            tag: tag.to_owned(),
            assets: assets
                .iter()
                .map(|(asset, url)| ReleaseAsset {
                    name: (*asset).to_owned(),
                    download_url: (*url).to_owned(),
                })
                .collect(),
        };
        self.releases
            .insert(RepositoryId::new(owner, name), Ok(release));
        self
    }

    /// Make every query for `owner/name` fail with a transport error.
    #[must_use]
    pub fn with_failure(mut self, owner: &str, name: &str, reason: &str) -> Self {
        self.releases
            .insert(RepositoryId::new(owner, name), Err(reason.to_owned()));
        self
    }

    /// Total number of queries received.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Repositories queried so far, in arrival order.
    #[must_use]
    pub fn queried(&self) -> Vec<RepositoryId> {
        self.queried
            .lock()
            .map(|queried| queried.clone())
            .unwrap_or_default()
    }

    fn answer(&self, repo: &RepositoryId) -> std::result::Result<Release, ReleaseError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queried) = self.queried.lock() {
            queried.push(repo.clone());
        }
        match self.releases.get(repo) {
            Some(Ok(release)) => Ok(release.clone()),
            Some(Err(reason)) => Err(ReleaseError::Transport {
                repository: repo.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ReleaseError::NotFound {
                repository: repo.to_string(),
            }),
        }
    }
}

impl ReleaseIndex for StubReleaseIndex {
    fn latest_release(&self, repo: &RepositoryId) -> std::result::Result<Release, ReleaseError> {
        self.answer(repo)
    }

    fn release_by_tag(
        &self,
        repo: &RepositoryId,
        tag: &str,
    ) -> std::result::Result<Release, ReleaseError> {
        let release = self.answer(repo)?;
        if release.tag == tag {
            Ok(release)
        } else {
            Err(ReleaseError::NotFound {
                repository: format!("{repo}@{tag}"),
            })
        }
    }
}
