//! Materializes virtual files back onto disk.
//!
//! Staging extracts the minimum set of archives needed to give every
//! requested file a concrete path. Containing archives are extracted
//! before the archives nested inside them, because a nested archive has
//! no on-disk path until its container has been materialized.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::extractor::ArchiveExtractor;
use crate::{Error, VirtualFile};

/// Scope of one staging call.
///
/// While the handle is alive, every requested file reports its on-disk
/// location through [VirtualFile::staged_path]. Dropping the handle
/// clears those paths and removes every scratch directory the call
/// allocated; directories already gone are ignored.
#[must_use = "dropping the handle immediately unstages everything"]
#[derive(Debug)]
pub struct StagingHandle {
    scratch_dirs: Vec<TempDir>,
    touched: Vec<Arc<VirtualFile>>,
}

impl StagingHandle {
    /// Number of virtual files this handle gave an on-disk path.
    pub fn staged_count(&self) -> usize {
        self.touched.len()
    }

    /// The scratch directories backing this handle, shallowest first.
    pub fn scratch_paths(&self) -> Vec<PathBuf> {
        self.scratch_dirs.iter().map(|d| d.path().to_path_buf()).collect()
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        for file in self.touched.drain(..) {
            file.clear_staged_path();
        }
        // the TempDirs remove their directories as they drop
    }
}

/// Stages `files`, extracting each involved archive into a fresh
/// scratch directory under `staging_root`.
///
/// If any extraction fails, everything allocated so far is removed and
/// the error surfaces; no partial staging state leaks.
#[instrument(skip_all, fields(requested = files.len()), err)]
pub async fn stage(
    extractor: &dyn ArchiveExtractor,
    staging_root: &Path,
    files: &[Arc<VirtualFile>],
) -> Result<StagingHandle, Error> {
    // Expand every requested file to its ancestor chain. Roots already
    // sit on disk and need no staging.
    let mut wanted: Vec<Arc<VirtualFile>> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for file in files {
        for node in file.files_in_full_path() {
            if node.is_root() {
                continue;
            }
            if seen.insert(node.full_path()) {
                wanted.push(node);
            }
        }
    }

    // Group by containing archive.
    let mut groups: Vec<(Arc<VirtualFile>, Vec<Arc<VirtualFile>>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for node in wanted {
        let parent = node.parent().ok_or_else(|| {
            Error::LookupMissing(format!("parent of {} is gone", node.full_path()))
        })?;
        let slot = *group_index.entry(parent.full_path()).or_insert_with(|| {
            groups.push((parent.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(node);
    }

    // Shallowest containers first; a nested archive is only extractable
    // once its container has a concrete path.
    groups.sort_by_key(|(parent, _)| parent.nesting_factor());

    let mut handle = StagingHandle {
        scratch_dirs: Vec::with_capacity(groups.len()),
        touched: Vec::new(),
    };

    for (parent, members) in groups {
        let source = if parent.is_root() {
            PathBuf::from(parent.name())
        } else {
            parent.staged_path().ok_or_else(|| {
                Error::LookupMissing(format!("{} was not staged before its children", parent.full_path()))
            })?
        };

        let scratch = tempfile::tempdir_in(staging_root)
            .map_err(|e| Error::Io(staging_root.to_path_buf(), e))?;

        // On failure `handle` drops here, clearing every staged path
        // set so far and removing the scratch directories.
        extractor
            .extract(&source, scratch.path())
            .await
            .map_err(|e| Error::ExtractionFailed(source.clone(), e))?;

        debug!(archive = %parent.full_path(), members = members.len(), "staged archive");

        for member in members {
            member.set_staged_path(scratch.path().join(member.name()));
            handle.touched.push(member);
        }
        handle.scratch_dirs.push(scratch);
    }

    Ok(handle)
}
