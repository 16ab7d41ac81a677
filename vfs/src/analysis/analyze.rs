use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tracing::{instrument, warn};
use walkdir::WalkDir;

use crate::extractor::{ArchiveDetector, ArchiveExtractor};
use crate::file::mtime_nanos;
use crate::{Error, FileHash, VirtualFile};

/// Chunk size for streaming file contents through the hasher. One
/// buffer is allocated per analyzed file and reused across its reads.
const HASH_CHUNK_LEN: usize = 64 * 1024;

/// Turns on-disk paths into [VirtualFile] trees: hash, probe for
/// archive-ness, extract into a scratch directory, recurse.
pub struct Analyzer {
    extractor: Arc<dyn ArchiveExtractor>,
    detector: Arc<dyn ArchiveDetector>,
    staging_root: PathBuf,
    parallelism: usize,
}

impl Analyzer {
    pub fn new(
        extractor: Arc<dyn ArchiveExtractor>,
        detector: Arc<dyn ArchiveDetector>,
        staging_root: PathBuf,
        parallelism: usize,
    ) -> Self {
        Self {
            extractor,
            detector,
            staging_root,
            parallelism,
        }
    }

    /// Analyzes a single on-disk file as a root node.
    #[instrument(skip(self), err)]
    pub async fn analyze_root(&self, path: &Path) -> Result<Arc<VirtualFile>, Error> {
        let name = path.to_string_lossy().into_owned();
        self.analyze(None, path.to_path_buf(), name).await
    }

    /// Analyzes `on_disk`, recursing into it when it is an archive.
    ///
    /// The returned node is not attached to `parent` yet; the caller
    /// attaches it, so sibling order stays deterministic regardless of
    /// which analysis finishes first.
    fn analyze(
        &self,
        parent: Option<Arc<VirtualFile>>,
        on_disk: PathBuf,
        logical_name: String,
    ) -> BoxFuture<'_, Result<Arc<VirtualFile>, Error>> {
        async move {
            let (hash, size) = hash_path(&on_disk).await?;

            let node = match &parent {
                None => {
                    let metadata = tokio::fs::metadata(&on_disk)
                        .await
                        .map_err(|e| Error::Io(on_disk.clone(), e))?;
                    VirtualFile::new_root(logical_name, Some(hash), size, mtime_nanos(&metadata))
                }
                Some(parent) => VirtualFile::new_child(parent, logical_name, Some(hash), size),
            };

            if self.detector.looks_like_archive(&on_disk) {
                self.descend(&node, &on_disk).await?;
            }

            Ok(node)
        }
        .boxed()
    }

    /// Extracts `on_disk` into a fresh scratch directory and analyzes
    /// everything that appeared. The scratch directory is removed before
    /// this returns, on every path.
    async fn descend(&self, node: &Arc<VirtualFile>, on_disk: &Path) -> Result<(), Error> {
        let scratch = tempfile::tempdir_in(&self.staging_root)
            .map_err(|e| Error::Io(self.staging_root.clone(), e))?;

        if let Err(e) = self.extractor.extract(on_disk, scratch.path()).await {
            // The detector liked the name, but the bytes disagree.
            // Keep the node as a plain leaf, its own hash still counts.
            warn!(archive = %on_disk.display(), error = %e, "extraction failed, keeping as leaf");
            return Ok(());
        }

        let entries = enumerate_files(scratch.path())?;

        let children: Vec<Arc<VirtualFile>> = futures::stream::iter(entries)
            .map(|(path, name)| self.analyze(Some(node.clone()), path, name))
            .buffered(self.parallelism)
            .try_collect()
            .await?;

        for child in children {
            node.attach_child(child);
        }

        Ok(())
    }
}

/// Enumerates regular files under `root`, returning each absolute path
/// together with its path relative to `root`.
pub(crate) fn enumerate_files(root: &Path) -> Result<Vec<(PathBuf, String)>, Error> {
    let mut out = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let io_err = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
            Error::Io(root.to_path_buf(), io_err)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| {
                Error::Io(
                    entry.path().to_path_buf(),
                    io::Error::new(io::ErrorKind::Other, e),
                )
            })?
            .to_string_lossy()
            .into_owned();

        out.push((entry.into_path(), relative));
    }

    Ok(out)
}

/// Reads the file at `path` chunk by chunk, feeding every byte through
/// the hasher, and returns its content hash together with the number of
/// bytes read.
pub(crate) async fn hash_path(path: &Path) -> Result<(FileHash, u64), Error> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::Io(path.to_path_buf(), e))?;

    let mut hasher = blake3::Hasher::new();
    let mut chunk = vec![0u8; HASH_CHUNK_LEN];
    let mut size = 0u64;

    loop {
        let n = file
            .read(&mut chunk)
            .await
            .map_err(|e| Error::HashFailed(path.to_path_buf(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        size += n as u64;
    }

    Ok((FileHash::from(hasher.finalize().as_bytes()), size))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::hash_path;
    use crate::fixtures::{
        BLOB_B, BLOB_B_HASH, EMPTY_BLOB_HASH, HELLOWORLD_BLOB_CONTENTS, HELLOWORLD_BLOB_HASH,
    };

    #[tokio::test]
    async fn hash_path_matches_in_memory_hashing() {
        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("blob");
        std::fs::write(&path, HELLOWORLD_BLOB_CONTENTS).unwrap();

        let (hash, size) = hash_path(&path).await.expect("must hash");
        assert_eq!(*HELLOWORLD_BLOB_HASH, hash);
        assert_eq!(HELLOWORLD_BLOB_CONTENTS.len() as u64, size);
    }

    #[tokio::test]
    async fn files_larger_than_one_chunk_hash_correctly() {
        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("large.blob");
        std::fs::write(&path, &BLOB_B[..]).unwrap();

        let (hash, size) = hash_path(&path).await.expect("must hash");
        assert_eq!(*BLOB_B_HASH, hash);
        assert_eq!(BLOB_B.len() as u64, size);
    }

    #[tokio::test]
    async fn empty_files_carry_the_empty_hash() {
        let tmpdir = TempDir::new().unwrap();
        let path = tmpdir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (hash, size) = hash_path(&path).await.expect("must hash");
        assert_eq!(*EMPTY_BLOB_HASH, hash);
        assert_eq!(0, size);
    }

    #[tokio::test]
    async fn hash_path_fails_on_missing_file() {
        let tmpdir = TempDir::new().unwrap();
        hash_path(&tmpdir.path().join("nope"))
            .await
            .expect_err("must fail");
    }
}
