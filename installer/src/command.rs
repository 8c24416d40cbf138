//! External command execution.
//!
//! Signature verification, image pulls, and the bundle installer are all
//! external programs. They run through [`CommandExecutor`] so tests can
//! substitute scripted responses for real processes.

use crate::error::{InstallerError, Result};
use std::process::{Command, ExitStatus, Output};

/// Abstraction for running external commands.
pub trait CommandExecutor {
    /// Runs a command with arguments and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::CommandLaunch`] if the command cannot be
    /// spawned. A non-zero exit is reported through the returned status, not
    /// as an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use km_installer::command::{CommandExecutor, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor;
    /// let output = executor.run("cosign", &["version"])?;
    /// assert!(output.status.success());
    /// # Ok::<(), km_installer::error::InstallerError>(())
    /// ```
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output>;

    /// Runs a command with inherited stdio, so the operator sees its output.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::CommandLaunch`] if the command cannot be
    /// spawned.
    fn run_attached(&self, cmd: &str, args: &[&str]) -> Result<ExitStatus> {
        self.run(cmd, args).map(|output| output.status)
    }
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        log::trace!("running {}", command_line(cmd, args));
        Command::new(cmd)
            .args(args)
            .output()
            .map_err(|source| InstallerError::CommandLaunch {
                command: command_line(cmd, args),
                source,
            })
    }

    fn run_attached(&self, cmd: &str, args: &[&str]) -> Result<ExitStatus> {
        log::trace!("running {} attached", command_line(cmd, args));
        Command::new(cmd)
            .args(args)
            .status()
            .map_err(|source| InstallerError::CommandLaunch {
                command: command_line(cmd, args),
                source,
            })
    }
}

/// Returns true if the given command executes successfully.
#[must_use]
pub fn command_succeeds(executor: &dyn CommandExecutor, cmd: &str, args: &[&str]) -> bool {
    executor.run(cmd, args).is_ok_and(|o| o.status.success())
}

/// Run `cmd` attached to the terminal and fail unless it exits with status 0.
///
/// # Errors
///
/// Returns [`InstallerError::CommandLaunch`] if the command cannot start and
/// [`InstallerError::CommandFailed`] if it exits unsuccessfully.
pub fn run_checked(executor: &dyn CommandExecutor, cmd: &str, args: &[&str]) -> Result<()> {
    let status = executor.run_attached(cmd, args)?;
    if status.success() {
        return Ok(());
    }
    Err(InstallerError::CommandFailed {
        command: command_line(cmd, args),
        status: describe_status(status),
    })
}

/// Render a command and its arguments as a single line for messages.
#[must_use]
pub fn command_line(cmd: &str, args: &[&str]) -> String {
    std::iter::once(cmd)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Describe an exit status as `exit code N` or `termination by signal`.
#[must_use]
pub fn describe_status(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "termination by signal".to_owned(),
        |code| format!("exit code {code}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        ExpectedCall, StubExecutor, exit_status, failure_output, success_output,
    };

    #[test]
    fn command_line_joins_arguments() {
        assert_eq!(
            command_line("cosign", &["verify-blob", "--key", "k.pub"]),
            "cosign verify-blob --key k.pub"
        );
    }

    #[test]
    fn describe_status_reports_exit_code() {
        assert_eq!(describe_status(exit_status(3)), "exit code 3");
    }

    #[test]
    fn command_succeeds_is_false_for_failed_or_missing_commands() {
        let executor = StubExecutor::new(vec![
            ExpectedCall::new("cosign", &["version"], Ok(failure_output("boom"))),
            ExpectedCall::new(
                "cosign",
                &["version"],
                Err(InstallerError::CommandLaunch {
                    command: "cosign version".to_owned(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            ),
            ExpectedCall::new("cosign", &["version"], Ok(success_output())),
        ]);

        assert!(!command_succeeds(&executor, "cosign", &["version"]));
        assert!(!command_succeeds(&executor, "cosign", &["version"]));
        assert!(command_succeeds(&executor, "cosign", &["version"]));
        executor.assert_finished();
    }

    #[test]
    fn run_checked_surfaces_the_exit_status() {
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "bash",
            &["-c", ". /etc/profile"],
            Ok(failure_output("no such file")),
        )]);

        let err = run_checked(&executor, "bash", &["-c", ". /etc/profile"])
            .expect_err("non-zero exit should fail");
        assert!(matches!(
            err,
            InstallerError::CommandFailed { ref status, .. } if status == "exit code 1"
        ));
    }

    #[test]
    fn system_executor_reports_launch_failure() {
        let err = SystemCommandExecutor
            .run("km-installer-definitely-missing-binary", &[])
            .expect_err("missing binary cannot launch");
        assert!(matches!(err, InstallerError::CommandLaunch { .. }));
    }
}
