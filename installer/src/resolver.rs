//! Concurrent latest-release resolution.
//!
//! [`resolve`] queries the release index once per repository, each query on
//! its own scoped thread. A failed query is logged and recorded against its
//! repository; it never aborts the others. All threads are joined before the
//! result channel is drained, so no outcome can be missed.

use crate::release::{ReleaseError, ReleaseIndex};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc;
use std::thread;

/// Identity of a release repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId {
    /// Account or organisation owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepositoryId {
    /// Create an identity from owner and name.
    #[must_use]
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A repository and the release version selected for it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Repository identity.
    pub id: RepositoryId,
    /// Release tag to use; `None` until resolved.
    pub pinned_version: Option<String>,
}

/// Insertion-ordered set of repositories, unique by identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepositorySet {
    entries: Vec<RepositoryRef>,
}

impl RepositorySet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a set of unpinned repositories sharing one owner.
    ///
    /// # Examples
    ///
    /// ```
    /// use km_installer::resolver::RepositorySet;
    ///
    /// let set = RepositorySet::for_owner("KiraCore", ["sekai", "interx", "sekai"]);
    /// let names: Vec<_> = set.iter().map(|repo| repo.id.name.as_str()).collect();
    /// assert_eq!(names, ["sekai", "interx"]);
    /// ```
    #[must_use]
    pub fn for_owner<'a>(owner: &str, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut set = Self::new();
        for name in names {
            set.insert(RepositoryRef {
                id: RepositoryId::new(owner, name),
                pinned_version: None,
            });
        }
        set
    }

    /// Add `repo` unless a repository with the same identity is present.
    ///
    /// Returns `true` if the entry was added.
    pub fn insert(&mut self, repo: RepositoryRef) -> bool {
        if self.get(&repo.id).is_some() {
            return false;
        }
        self.entries.push(repo);
        true
    }

    /// Look up a repository by identity.
    #[must_use]
    pub fn get(&self, id: &RepositoryId) -> Option<&RepositoryRef> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, RepositoryRef> {
        self.entries.iter()
    }

    /// Number of repositories.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no repositories.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a RepositorySet {
    type Item = &'a RepositoryRef;
    type IntoIter = std::slice::Iter<'a, RepositoryRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Why a single repository could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The release index query failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// The resolving thread panicked before reporting.
    #[error("{repository}: resolver task panicked")]
    TaskPanicked {
        /// `owner/name` of the repository.
        repository: String,
    },
}

/// Per-repository outcomes of one [`resolve`] call.
#[derive(Debug, Default)]
pub struct Resolution {
    outcomes: HashMap<RepositoryId, Result<String, ResolutionError>>,
    tasks_launched: usize,
}

impl Resolution {
    /// The resolved tag for `id`, if resolution succeeded.
    #[must_use]
    pub fn tag_for(&self, id: &RepositoryId) -> Option<&str> {
        self.outcomes
            .get(id)
            .and_then(|outcome| outcome.as_ref().ok())
            .map(String::as_str)
    }

    /// The outcome recorded for `id`, if it was part of the request.
    #[must_use]
    pub fn outcome(&self, id: &RepositoryId) -> Option<&Result<String, ResolutionError>> {
        self.outcomes.get(id)
    }

    /// Repositories whose resolution failed, sorted by identity.
    #[must_use]
    pub fn failures(&self) -> Vec<(&RepositoryId, &ResolutionError)> {
        let mut failures: Vec<_> = self
            .outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|err| (id, err)))
            .collect();
        failures.sort_by(|a, b| a.0.cmp(b.0));
        failures
    }

    /// Number of resolver threads that were started.
    #[must_use]
    pub const fn tasks_launched(&self) -> usize {
        self.tasks_launched
    }

    /// Build the successor of `repos`: resolved entries carry their tag,
    /// failed ones are omitted, and input order is kept.
    #[must_use]
    pub fn apply_to(&self, repos: &RepositorySet) -> RepositorySet {
        let mut resolved = RepositorySet::new();
        for repo in repos {
            if let Some(tag) = self.tag_for(&repo.id) {
                resolved.insert(RepositoryRef {
                    id: repo.id.clone(),
                    pinned_version: Some(tag.to_owned()),
                });
            }
        }
        resolved
    }
}

/// Resolve the latest release tag of every repository in `repos`.
///
/// One thread is started per repository and all of them share `index`. An
/// empty set returns immediately without starting any thread.
///
/// # Examples
///
/// ```no_run
/// use km_installer::release::GitHubReleaseIndex;
/// use km_installer::resolver::{RepositorySet, resolve};
///
/// let index = GitHubReleaseIndex::new(None, std::time::Duration::from_secs(30));
/// let repos = RepositorySet::for_owner("KiraCore", ["sekai", "interx"]);
/// let resolved = resolve(&repos, &index).apply_to(&repos);
/// ```
#[must_use]
pub fn resolve(repos: &RepositorySet, index: &dyn ReleaseIndex) -> Resolution {
    if repos.is_empty() {
        return Resolution::default();
    }

    let (tx, rx) = mpsc::sync_channel(repos.len());
    let mut outcomes = HashMap::with_capacity(repos.len());

    thread::scope(|scope| {
        let handles: Vec<_> = repos
            .iter()
            .map(|repo| {
                let tx = tx.clone();
                let id = repo.id.clone();
                let handle = scope.spawn(move || {
                    let outcome = index.latest_release(&id).map(|release| release.tag);
                    if let Err(err) = &outcome {
                        log::warn!("could not resolve {id}: {err}");
                    }
                    if tx.send((id, outcome)).is_err() {
                        log::debug!("resolution collector went away");
                    }
                });
                (repo.id.clone(), handle)
            })
            .collect();
        drop(tx);

        // Barrier: every task has reported or died before the channel closes.
        for (id, handle) in handles {
            if handle.join().is_err() {
                log::warn!("resolver task for {id} panicked");
                let repository = id.to_string();
                outcomes.insert(id, Err(ResolutionError::TaskPanicked { repository }));
            }
        }
    });

    for (id, outcome) in rx {
        if let Ok(tag) = &outcome {
            log::debug!("resolved {id} to {tag}");
        }
        outcomes.insert(id, outcome.map_err(ResolutionError::from));
    }

    Resolution {
        outcomes,
        tasks_launched: repos.len(),
    }
}
