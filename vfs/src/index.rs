use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Error, FileHash, VirtualFile};

/// Immutable index over a forest of [VirtualFile]s.
///
/// `all_files` holds the roots; the four lookup tables are derived from
/// a full pre-order traversal of those roots and are always rebuilt
/// together, so they cannot drift apart. [IndexRoot::integrate] returns
/// a fresh instance and never touches `self`, which lets readers keep
/// using an old index while a new one is under construction.
#[derive(Debug, Default)]
pub struct IndexRoot {
    all_files: Vec<Arc<VirtualFile>>,
    by_full_path: HashMap<String, Arc<VirtualFile>>,
    by_root_path: HashMap<String, Arc<VirtualFile>>,
    by_hash: HashMap<FileHash, Vec<Arc<VirtualFile>>>,
    by_name: HashMap<String, Vec<Arc<VirtualFile>>>,
}

impl IndexRoot {
    pub fn new() -> Self {
        Default::default()
    }

    /// Merges `new_roots` into this index and returns the result.
    ///
    /// Roots are keyed by their `name`. When the same name occurs more
    /// than once across the existing list and the new one, the last
    /// occurrence wins while keeping the position of the first, so a
    /// rescan replaces entries in place instead of reshuffling the list.
    pub fn integrate(&self, new_roots: Vec<Arc<VirtualFile>>) -> IndexRoot {
        let mut order: Vec<Arc<VirtualFile>> =
            Vec::with_capacity(self.all_files.len() + new_roots.len());
        let mut position: HashMap<String, usize> = HashMap::new();

        for file in self.all_files.iter().cloned().chain(new_roots) {
            match position.entry(file.name().to_owned()) {
                Entry::Occupied(slot) => order[*slot.get()] = file,
                Entry::Vacant(slot) => {
                    slot.insert(order.len());
                    order.push(file);
                }
            }
        }

        Self::build(order)
    }

    fn build(all_files: Vec<Arc<VirtualFile>>) -> IndexRoot {
        let mut by_full_path = HashMap::new();
        let mut by_root_path = HashMap::new();
        let mut by_hash: HashMap<FileHash, Vec<Arc<VirtualFile>>> = HashMap::new();
        let mut by_name: HashMap<String, Vec<Arc<VirtualFile>>> = HashMap::new();

        for root in &all_files {
            by_root_path.insert(root.name().to_owned(), root.clone());

            for node in root.this_and_all_children() {
                by_full_path.insert(node.full_path(), node.clone());
                if let Some(hash) = node.hash() {
                    by_hash.entry(hash.clone()).or_default().push(node.clone());
                }
                by_name.entry(node.basename()).or_default().push(node.clone());
            }
        }

        IndexRoot {
            all_files,
            by_full_path,
            by_root_path,
            by_hash,
            by_name,
        }
    }

    /// The root files, in integration order. Not the full forest.
    pub fn all_files(&self) -> &[Arc<VirtualFile>] {
        &self.all_files
    }

    pub fn by_full_path(&self, full_path: &str) -> Option<Arc<VirtualFile>> {
        self.by_full_path.get(full_path).cloned()
    }

    pub fn by_root_path(&self, name: &str) -> Option<Arc<VirtualFile>> {
        self.by_root_path.get(name).cloned()
    }

    /// Every node in the forest carrying this hash. Hash collisions are
    /// expected (the same payload can live in many archives), so this is
    /// a stack, never deduplicated.
    pub fn by_hash(&self, hash: &FileHash) -> Option<&Vec<Arc<VirtualFile>>> {
        self.by_hash.get(hash)
    }

    pub fn by_name(&self, basename: &str) -> Option<&Vec<Arc<VirtualFile>>> {
        self.by_name.get(basename)
    }

    /// Number of nodes in the forest, counted over distinct full paths.
    pub fn full_path_count(&self) -> usize {
        self.by_full_path.len()
    }

    /// Resolves an archive hash path: the hash of a root archive,
    /// followed by the basenames of the members to descend through.
    pub fn file_for_archive_hash_path<S: AsRef<str>>(
        &self,
        hash: &FileHash,
        names: &[S],
    ) -> Result<Arc<VirtualFile>, Error> {
        let candidates = self
            .by_hash
            .get(hash)
            .ok_or_else(|| Error::LookupMissing(format!("no file with hash {}", hash)))?;

        let mut current = candidates
            .iter()
            .find(|f| f.is_root())
            .cloned()
            .ok_or_else(|| Error::LookupMissing(format!("no root archive with hash {}", hash)))?;

        for name in names {
            let name = name.as_ref();
            let mut matches: Vec<Arc<VirtualFile>> = current
                .children()
                .into_iter()
                .filter(|c| c.basename() == name)
                .collect();

            current = match matches.len() {
                1 => matches.remove(0),
                0 => {
                    return Err(Error::LookupMissing(format!(
                        "no member named {} under {}",
                        name,
                        current.full_path()
                    )))
                }
                _ => {
                    return Err(Error::LookupMissing(format!(
                        "member name {} is ambiguous under {}",
                        name,
                        current.full_path()
                    )))
                }
            };
        }

        Ok(current)
    }
}
