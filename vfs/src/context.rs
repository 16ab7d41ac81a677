use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::analysis::{self, Analyzer};
use crate::cache;
use crate::config::VfsConfig;
use crate::extractor::{ArchiveDetector, ArchiveExtractor, ExtensionDetector, TarExtractor};
use crate::staging::{self, StagingHandle};
use crate::{Error, FileHash, IndexRoot, KnownFile, PortableFile, VirtualFile};

/// Owner of the current [IndexRoot].
///
/// The index itself is an immutable value behind an [Arc]; readers grab
/// a snapshot and keep using it no matter what happens afterwards.
/// Writers prepare a full replacement outside the lock and only take it
/// for the final swap, so two concurrent scans are safe and the later
/// swap wins wholesale.
pub struct Context {
    config: VfsConfig,
    extractor: Arc<dyn ArchiveExtractor>,
    detector: Arc<dyn ArchiveDetector>,
    index: RwLock<Arc<IndexRoot>>,
    known_files: Mutex<Vec<KnownFile>>,
}

impl Context {
    /// A context with the stock tar collaborators.
    pub fn new(config: VfsConfig) -> Result<Self, Error> {
        Self::with_collaborators(
            config,
            Arc::new(TarExtractor),
            Arc::new(ExtensionDetector::default()),
        )
    }

    pub fn with_collaborators(
        config: VfsConfig,
        extractor: Arc<dyn ArchiveExtractor>,
        detector: Arc<dyn ArchiveDetector>,
    ) -> Result<Self, Error> {
        std::fs::create_dir_all(&config.staging_root)
            .map_err(|e| Error::Io(config.staging_root.clone(), e))?;

        Ok(Self {
            config,
            extractor,
            detector,
            index: RwLock::new(Arc::new(IndexRoot::new())),
            known_files: Mutex::new(Vec::new()),
        })
    }

    /// Snapshot of the current index. Stays valid forever.
    pub fn index(&self) -> Arc<IndexRoot> {
        self.index.read().clone()
    }

    fn install(&self, index: IndexRoot) {
        *self.index.write() = Arc::new(index);
    }

    /// Scans `root` and merges the result into the index.
    ///
    /// Entries whose size and mtime still match the disk are reused
    /// without re-hashing; everything else is analyzed concurrently.
    #[instrument(skip(self), err)]
    pub async fn add_root(&self, root: &Path) -> Result<(), Error> {
        if !root.is_absolute() {
            return Err(Error::NotAbsolutePath(root.to_path_buf()));
        }

        let snapshot = self.index();
        let analyzer = Analyzer::new(
            self.extractor.clone(),
            self.detector.clone(),
            self.config.staging_root.clone(),
            self.config.analysis_parallelism,
        );

        let roots = analysis::scan_root(
            &analyzer,
            &snapshot,
            root,
            self.config.analysis_queue_depth,
            self.config.analysis_parallelism,
        )
        .await?;

        self.install(snapshot.integrate(roots));
        Ok(())
    }

    /// Writes the current forest to the binary cache file at `path`.
    #[instrument(skip(self), err)]
    pub async fn write_to_file(&self, path: &Path) -> Result<(), Error> {
        let snapshot = self.index();

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::Io(path.to_path_buf(), e))?;
        let mut writer = tokio::io::BufWriter::new(file);

        cache::write_index(&mut writer, snapshot.all_files())
            .await
            .map_err(|e| Error::Io(path.to_path_buf(), e))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Io(path.to_path_buf(), e))?;

        Ok(())
    }

    /// Loads a cache file and merges its forest into the index. The
    /// index is untouched when the file does not validate.
    #[instrument(skip(self), err)]
    pub async fn integrate_from_file(&self, path: &Path) -> Result<(), Error> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::Io(path.to_path_buf(), e))?;
        let mut reader = tokio::io::BufReader::new(file);

        let roots = cache::read_index(&mut reader).await.map_err(|e| {
            match e.kind() {
                // both decoder rejections and files that end mid-record
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                    Error::BadCacheFormat(e.to_string())
                }
                _ => Error::Io(path.to_path_buf(), e),
            }
        })?;

        debug!(roots = roots.len(), "integrating cached forest");
        let snapshot = self.index();
        self.install(snapshot.integrate(roots));
        Ok(())
    }

    /// Queues externally attested files for [Context::backfill_missing].
    /// The index is not touched.
    ///
    /// A record attesting an already-queued root path under a different
    /// hash is rejected, and the batch is discarded whole.
    pub fn add_known(
        &self,
        records: impl IntoIterator<Item = KnownFile>,
    ) -> Result<(), Error> {
        let batch: Vec<KnownFile> = records.into_iter().collect();

        let mut known = self.known_files.lock();
        for record in &batch {
            if record.path.len() != 1 {
                continue;
            }
            let conflicting = known
                .iter()
                .chain(batch.iter())
                .filter(|k| k.path.len() == 1 && k.path[0] == record.path[0])
                .any(|k| k.hash != record.hash);
            if conflicting {
                return Err(Error::ConflictingKnownFile(record.path[0].clone()));
            }
        }
        known.extend(batch);
        Ok(())
    }

    pub fn known_file_count(&self) -> usize {
        self.known_files.lock().len()
    }

    /// Synthesizes forest topology out of the queued known files and
    /// integrates it.
    ///
    /// One-component records become roots carrying their attested hash.
    /// Longer records walk root-to-leaf, creating any missing child
    /// along the way; only the final component carries the record's
    /// hash, the intermediate nodes are structural placeholders without
    /// one. The queue is cleared afterwards.
    pub fn backfill_missing(&self) {
        let records: Vec<KnownFile> = self.known_files.lock().clone();

        let mut roots: HashMap<String, Arc<VirtualFile>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        let mut root_for = |path: &str, hash: Option<FileHash>| -> Arc<VirtualFile> {
            roots
                .entry(path.to_owned())
                .or_insert_with(|| {
                    order.push(path.to_owned());
                    VirtualFile::new_root(path.to_owned(), hash, 0, None)
                })
                .clone()
        };

        for record in records.iter().filter(|r| r.path.len() == 1) {
            root_for(&record.path[0], Some(record.hash.clone()));
        }

        for record in records.iter().filter(|r| r.path.len() > 1) {
            let mut current = root_for(&record.path[0], None);
            for (i, component) in record.path[1..].iter().enumerate() {
                let is_leaf = i + 2 == record.path.len();
                current = match current.child_named(component) {
                    Some(existing) => existing,
                    None => {
                        let hash = if is_leaf { Some(record.hash.clone()) } else { None };
                        let child =
                            VirtualFile::new_child(&current, component.clone(), hash, 0);
                        current.attach_child(child.clone());
                        child
                    }
                };
            }
        }

        let new_roots: Vec<Arc<VirtualFile>> =
            order.iter().filter_map(|name| roots.get(name).cloned()).collect();

        let snapshot = self.index();
        self.install(snapshot.integrate(new_roots));
        self.known_files.lock().clear();
    }

    /// Portable records for `files` and all their ancestors. Roots get
    /// a [None] name, their local path is not meaningful elsewhere.
    /// Placeholder nodes without a hash cannot travel and are skipped.
    pub fn get_portable_state(&self, files: &[Arc<VirtualFile>]) -> Vec<PortableFile> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for file in files {
            for node in file.files_in_full_path() {
                if !seen.insert(node.full_path()) {
                    continue;
                }
                let Some(hash) = node.hash() else {
                    continue;
                };
                out.push(PortableFile {
                    name: node.parent().map(|_| node.basename()),
                    hash: hash.clone(),
                    parent_hash: node.parent().and_then(|p| p.hash().cloned()),
                    size: node.size(),
                });
            }
        }

        out
    }

    /// Rebuilds forest structure from portable records and integrates
    /// it. `link_map` resolves a root hash back to an on-disk path;
    /// a root record without a link entry fails the whole call.
    pub fn integrate_from_portable(
        &self,
        state: &[PortableFile],
        link_map: &HashMap<FileHash, PathBuf>,
    ) -> Result<(), Error> {
        let mut by_parent: HashMap<Option<FileHash>, Vec<&PortableFile>> = HashMap::new();
        for record in state {
            by_parent
                .entry(record.parent_hash.clone())
                .or_default()
                .push(record);
        }

        let mut roots = Vec::new();
        for record in by_parent.get(&None).cloned().unwrap_or_default() {
            roots.push(create_from_portable(None, record, &by_parent, link_map)?);
        }

        let snapshot = self.index();
        self.install(snapshot.integrate(roots));
        Ok(())
    }

    /// Materializes `files` on disk. See [crate::staging].
    pub async fn stage(&self, files: &[Arc<VirtualFile>]) -> Result<StagingHandle, Error> {
        staging::stage(
            self.extractor.as_ref(),
            &self.config.staging_root,
            files,
        )
        .await
    }
}

/// Builds one node from its portable record, recursing into every
/// record whose `parent_hash` names this node's hash.
fn create_from_portable(
    parent: Option<&Arc<VirtualFile>>,
    record: &PortableFile,
    by_parent: &HashMap<Option<FileHash>, Vec<&PortableFile>>,
    link_map: &HashMap<FileHash, PathBuf>,
) -> Result<Arc<VirtualFile>, Error> {
    let node = match parent {
        None => {
            let path = link_map.get(&record.hash).ok_or_else(|| {
                Error::LookupMissing(format!("no on-disk link for root hash {}", record.hash))
            })?;
            VirtualFile::new_root(
                path.to_string_lossy().into_owned(),
                Some(record.hash.clone()),
                record.size,
                None,
            )
        }
        Some(parent) => {
            let name = record.name.clone().ok_or_else(|| {
                Error::LookupMissing(format!("record {} has a parent but no name", record.hash))
            })?;
            VirtualFile::new_child(parent, name, Some(record.hash.clone()), record.size)
        }
    };

    if let Some(children) = by_parent.get(&Some(record.hash.clone())) {
        for child_record in children.iter().copied() {
            let child = create_from_portable(Some(&node), child_record, by_parent, link_map)?;
            node.attach_child(child);
        }
    }

    Ok(node)
}
