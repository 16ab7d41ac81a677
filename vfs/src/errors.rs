use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the VFS core.
///
/// Nothing in here is retried internally. Either a whole new index is
/// installed, or the previous one stays in place untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// Scan roots must be absolute, rejected before any work happens.
    #[error("path {} is not absolute", .0.display())]
    NotAbsolutePath(PathBuf),

    /// The cache file failed magic/version/structure validation.
    #[error("bad cache format: {0}")]
    BadCacheFormat(String),

    #[error("I/O error at {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    /// Extraction of an archive failed. Fatal during staging; during
    /// analysis the node is downgraded to a leaf instead.
    #[error("unable to extract {}: {}", .0.display(), .1)]
    ExtractionFailed(PathBuf, #[source] std::io::Error),

    #[error("unable to hash {}: {}", .0.display(), .1)]
    HashFailed(PathBuf, #[source] std::io::Error),

    /// A lookup (hash, archive hash path, portable link) found nothing.
    #[error("lookup missing: {0}")]
    LookupMissing(String),

    /// Two known-file records attest the same root path with different
    /// hashes. Rejected when the record is added.
    #[error("conflicting known file for root {0}")]
    ConflictingKnownFile(String),
}
