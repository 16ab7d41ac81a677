//! The seam between the index and the archive formats it can descend
//! into. The index itself never parses archive bytes; it hands a path
//! and a target directory to an [ArchiveExtractor] and walks whatever
//! appeared on disk afterwards.

use std::io;
use std::path::Path;

use async_trait::async_trait;

/// Materializes the contents of an archive into a target directory.
///
/// Implementations fail with an [io::Error] when the bytes are not a
/// recognized archive. On success the target directory contains the
/// extracted tree.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive: &Path, target: &Path) -> io::Result<()>;
}

/// Decides whether a file is a container worth descending into.
/// Must be pure: no side effects, and stable for a given path.
pub trait ArchiveDetector: Send + Sync {
    fn looks_like_archive(&self, path: &Path) -> bool;
}

/// Extractor for tarballs.
pub struct TarExtractor;

#[async_trait]
impl ArchiveExtractor for TarExtractor {
    async fn extract(&self, archive: &Path, target: &Path) -> io::Result<()> {
        let file = tokio::fs::File::open(archive).await?;
        let mut archive = tokio_tar::Archive::new(file);
        archive.unpack(target).await
    }
}

/// Detects archives by file extension, case-insensitively.
pub struct ExtensionDetector {
    extensions: Vec<String>,
}

impl ExtensionDetector {
    pub fn new<S: Into<String>>(extensions: impl IntoIterator<Item = S>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Default for ExtensionDetector {
    fn default() -> Self {
        Self::new(["tar"])
    }
}

impl ArchiveDetector for ExtensionDetector {
    fn looks_like_archive(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }
}
