//! Shared runtime core for multi-region AWS inventory exports
//!
//! Export scripts differ only in which describe/list calls they make and how
//! they map responses to rows; everything else they share lives here:
//!
//! - [`aws`] - credential resolution, partition detection, resilient clients
//! - [`boundary`] - standardized error classification and recovery
//! - [`checkpoint`] - resumable progress for long scans
//! - [`export`] - the prepare/sanitize/validate pipeline and writer seam
//! - [`cost`] - static price tables and optimization advice
//! - [`scan`] - the checkpointed region-scan driver tying it together
//! - [`config`] - read-only operator configuration

pub mod aws;
pub mod boundary;
pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod export;
pub mod scan;

/// Version injected at compile time via STRATUS_VERSION env var (set by
/// CI/CD), or the crate version for local builds.
pub const VERSION: &str = match option_env!("STRATUS_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
