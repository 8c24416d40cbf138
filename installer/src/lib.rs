//! KIRA node bootstrap installer library.
//!
//! This crate acquires the third-party artefacts a KIRA node operator needs
//! (the base container image, release packages, and the `bash-utils` tooling
//! bundle) and refuses to pull, place, or execute any of them until the
//! relevant trust gate has passed. It is used by the `km-installer` binary and
//! can be driven programmatically with substitute collaborators for testing.
//!
//! # Modules
//!
//! - [`artefact`] - Download, checksum, and detached-signature primitives
//! - [`cli`] - Command-line argument definitions
//! - [`command`] - External command execution abstraction
//! - [`config`] - Immutable bootstrap configuration and host platform
//! - [`error`] - Semantic error types naming the gate that failed
//! - [`image`] - Base image trust gate and pull trigger
//! - [`launch`] - Top-level orchestration of a bootstrap run
//! - [`output`] - Operator-facing progress and dry-run output
//! - [`pipeline`] - Verifier and tooling bundle install state machine
//! - [`privilege`] - Effective-user checks before installing
//! - [`release`] - Release index client and release asset download
//! - [`resolver`] - Concurrent latest-release resolution

pub mod artefact;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod image;
pub mod launch;
pub mod output;
pub mod pipeline;
pub mod privilege;
pub mod release;
pub mod resolver;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
