//! Artefact download and integrity gates.
//!
//! Everything the installer fetches passes through this module before it is
//! trusted: the fetcher writes bytes to a staging path, and one of the gates
//! must accept that exact file before the caller may move or execute it.
//!
//! # Sub-modules
//!
//! - [`checksum`] - Pinned SHA-256 verification keyed by CPU architecture.
//! - [`download`] - Fetcher trait and `ureq` implementation.
//! - [`error`] - Validation errors for artefact values.
//! - [`sha256_digest`] - SHA-256 digest newtype (`Sha256Digest`).
//! - [`signature`] - Detached signature verification via an external tool.

pub mod checksum;
pub mod download;
pub mod error;
pub mod sha256_digest;
pub mod signature;
