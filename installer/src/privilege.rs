//! Privilege check run before anything is installed.
//!
//! The install targets are system directories, so the process must be root,
//! and it must have been started through `sudo` so the invoking operator is
//! known.

use crate::error::{InstallerError, Result};

/// Privileges the process was found to have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeLevel {
    /// Root obtained through `sudo` by the named user.
    SudoRoot {
        /// Value of `SUDO_USER`.
        invoking_user: String,
    },
}

/// Decide whether a process with effective `uid` may run the install.
///
/// # Errors
///
/// Returns [`InstallerError::InsufficientPrivileges`] for non-root users and
/// for root sessions not started through `sudo`.
///
/// # Examples
///
/// ```
/// use km_installer::privilege::{PrivilegeLevel, check_privileges};
///
/// let level = check_privileges(0, Some("operator"))?;
/// assert_eq!(level, PrivilegeLevel::SudoRoot { invoking_user: "operator".to_owned() });
/// assert!(check_privileges(1000, None).is_err());
/// # Ok::<(), km_installer::error::InstallerError>(())
/// ```
pub fn check_privileges(uid: u32, sudo_user: Option<&str>) -> Result<PrivilegeLevel> {
    if uid != 0 {
        return Err(InstallerError::InsufficientPrivileges {
            reason: format!("running as uid {uid}; re-run with sudo"),
        });
    }
    let Some(user) = sudo_user.filter(|user| !user.is_empty()) else {
        return Err(InstallerError::InsufficientPrivileges {
            reason: concat!(
                "running as root without sudo; ",
                "start the installer with sudo from an operator account"
            )
            .to_owned(),
        });
    };
    Ok(PrivilegeLevel::SudoRoot {
        invoking_user: user.to_owned(),
    })
}

/// Effective uid of this process.
#[cfg(unix)]
#[must_use]
pub fn current_effective_uid() -> u32 {
    // SAFETY: geteuid takes no arguments, cannot fail, and touches no memory
    // owned by Rust.
    unsafe { libc::geteuid() }
}

/// Check the privileges of the running process.
///
/// # Errors
///
/// See [`check_privileges`].
#[cfg(unix)]
pub fn check_current_process() -> Result<PrivilegeLevel> {
    let uid = current_effective_uid();
    let sudo_user = std::env::var("SUDO_USER").ok();
    check_privileges(uid, sudo_user.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn sudo_root_is_accepted() {
        let level = check_privileges(0, Some("operator")).expect("allowed");
        assert_eq!(
            level,
            PrivilegeLevel::SudoRoot {
                invoking_user: "operator".to_owned()
            }
        );
    }

    #[rstest]
    #[case::plain_root(0, None, "without sudo")]
    #[case::empty_sudo_user(0, Some(""), "without sudo")]
    #[case::operator(1000, None, "uid 1000")]
    #[case::operator_with_stale_sudo_user(1000, Some("operator"), "uid 1000")]
    fn other_sessions_are_refused(
        #[case] uid: u32,
        #[case] sudo_user: Option<&str>,
        #[case] fragment: &str,
    ) {
        let err = check_privileges(uid, sudo_user).expect_err("refused");
        assert!(err.to_string().contains(fragment), "{err}");
    }

    #[test]
    fn effective_uid_matches_a_file_this_process_creates() {
        use std::os::unix::fs::MetadataExt;

        let file = tempfile::NamedTempFile::new().expect("temp file");
        let owner = file.as_file().metadata().expect("metadata").uid();
        assert_eq!(current_effective_uid(), owner);
    }

    #[test]
    fn check_current_process_reads_sudo_user() {
        temp_env::with_var("SUDO_USER", None::<&str>, || {
            // Whatever the test runner's uid, an unset SUDO_USER is refused.
            assert!(check_current_process().is_err());
        });
    }
}
