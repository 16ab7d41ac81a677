//! The scan pipeline: enumerate a root directory, reuse index entries
//! whose size and mtime still match the disk, and push everything else
//! through a bounded pool of concurrent analyzers.
//!
//! The walker feeds a bounded queue consumed by the workers; results
//! are collected unordered, so nothing downstream may depend on
//! completion order.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::file::mtime_nanos;
use crate::{Error, IndexRoot, VirtualFile};

mod analyze;
pub use analyze::Analyzer;

/// Scans `root`, reusing matching entries from `index`.
///
/// Returns the list to integrate: every already-indexed root that still
/// exists on disk, followed by the freshly analyzed files. Entries for
/// files that changed appear in both halves; integration resolves that
/// in favor of the fresh one.
#[instrument(skip(analyzer, index), err)]
pub async fn scan_root(
    analyzer: &Analyzer,
    index: &IndexRoot,
    root: &Path,
    queue_depth: usize,
    parallelism: usize,
) -> Result<Vec<Arc<VirtualFile>>, Error> {
    let mut surviving = Vec::new();
    for file in index.all_files() {
        if tokio::fs::metadata(file.name()).await.is_ok() {
            surviving.push(file.clone());
        }
    }

    let by_path: HashMap<String, Arc<VirtualFile>> = surviving
        .iter()
        .map(|f| (f.name().to_owned(), f.clone()))
        .collect();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<std::path::PathBuf, Error>>(queue_depth);
    let walk_root = root.to_path_buf();
    let walker = tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&walk_root).follow_links(false) {
            let item = match entry {
                Ok(e) if e.file_type().is_file() => Ok(e.into_path()),
                Ok(_) => continue,
                Err(e) => {
                    let io_err = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                    Err(Error::Io(walk_root.clone(), io_err))
                }
            };
            // a closed receiver means the scan was cancelled or failed
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    let by_path = &by_path;
    let analyzed: Vec<Option<Arc<VirtualFile>>> = ReceiverStream::new(rx)
        .map(|item| async move {
            let path = item?;

            if let Some(existing) = by_path.get(path.to_string_lossy().as_ref()) {
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .map_err(|e| Error::Io(path.clone(), e))?;
                if existing.size() == metadata.len()
                    && existing.last_modified() == mtime_nanos(&metadata)
                {
                    // unchanged, the surviving entry stands
                    return Ok(None);
                }
            }

            analyzer.analyze_root(&path).await.map(Some)
        })
        .buffer_unordered(parallelism)
        .try_collect()
        .await?;

    walker
        .await
        .map_err(|e| Error::Io(root.to_path_buf(), io::Error::new(io::ErrorKind::Other, e)))?;

    let fresh: Vec<Arc<VirtualFile>> = analyzed.into_iter().flatten().collect();
    debug!(
        surviving = surviving.len(),
        analyzed = fresh.len(),
        "scan complete"
    );

    surviving.extend(fresh);
    Ok(surviving)
}
