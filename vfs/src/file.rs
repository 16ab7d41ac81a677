use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::FileHash;

/// Separator between the on-disk root path and the archive-internal
/// names when rendering a [VirtualFile::full_path]. Reserved: archive
/// member names never contain it.
pub const FULL_PATH_DELIMITER: &str = "|";

/// One node in the file forest.
///
/// A root node describes a file that exists on disk; its `name` is the
/// absolute path it was scanned from. A child node describes a file
/// found inside an archive; its `name` is the path of the member within
/// that archive. Archives nest arbitrarily deep, so a child can itself
/// have children.
///
/// Edges down the tree own their nodes, the edge back up is a [Weak]
/// reference, so a forest never forms a cycle.
#[derive(Debug)]
pub struct VirtualFile {
    name: String,
    parent: Weak<VirtualFile>,
    children: RwLock<Vec<Arc<VirtualFile>>>,
    hash: Option<FileHash>,
    size: u64,
    last_modified: Option<u64>,
    staged_path: RwLock<Option<PathBuf>>,
}

impl VirtualFile {
    /// Creates a parentless node. `name` is the absolute on-disk path.
    pub fn new_root(
        name: String,
        hash: Option<FileHash>,
        size: u64,
        last_modified: Option<u64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent: Weak::new(),
            children: RwLock::new(Vec::new()),
            hash,
            size,
            last_modified,
            staged_path: RwLock::new(None),
        })
    }

    /// Creates a child node pointing back at `parent`.
    ///
    /// The child is not attached yet. Callers attach it with
    /// [VirtualFile::attach_child] once they know its position, which
    /// keeps `children` in enumeration order even when siblings are
    /// analyzed concurrently.
    pub fn new_child(
        parent: &Arc<Self>,
        name: String,
        hash: Option<FileHash>,
        size: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent: Arc::downgrade(parent),
            children: RwLock::new(Vec::new()),
            hash,
            size,
            last_modified: None,
            staged_path: RwLock::new(None),
        })
    }

    /// Appends a child created via [VirtualFile::new_child].
    pub fn attach_child(self: &Arc<Self>, child: Arc<VirtualFile>) {
        debug_assert!(
            child
                .parent()
                .map(|p| Arc::ptr_eq(&p, self))
                .unwrap_or(false),
            "child must point back at the node it is attached to"
        );
        self.children.write().push(child);
    }

    /// Looks up a direct child by its exact name. Names are unique
    /// within a parent.
    pub fn child_named(&self, name: &str) -> Option<Arc<VirtualFile>> {
        self.children.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<VirtualFile>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<VirtualFile>> {
        self.children.read().clone()
    }

    pub fn hash(&self) -> Option<&FileHash> {
        self.hash.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification timestamp of the underlying on-disk file, in
    /// nanoseconds since the Unix epoch. Only roots carry one.
    pub fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    pub fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    /// An archive is a node something was extracted out of.
    pub fn is_archive(&self) -> bool {
        !self.children.read().is_empty()
    }

    /// Where this file currently sits on disk, if a staging handle is
    /// live for it.
    pub fn staged_path(&self) -> Option<PathBuf> {
        self.staged_path.read().clone()
    }

    pub(crate) fn set_staged_path(&self, path: PathBuf) {
        *self.staged_path.write() = Some(path);
    }

    pub(crate) fn clear_staged_path(&self) {
        *self.staged_path.write() = None;
    }

    /// Pre-order traversal of this node and its whole subtree.
    pub fn this_and_all_children(self: &Arc<Self>) -> Vec<Arc<VirtualFile>> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            out.push(node.clone());
            let children = node.children.read();
            for child in children.iter().rev() {
                stack.push(child.clone());
            }
        }
        out
    }

    /// The chain from the root down to this node, inclusive.
    pub fn files_in_full_path(self: &Arc<Self>) -> Vec<Arc<VirtualFile>> {
        let mut chain = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Root path plus archive-internal names, joined with
    /// [FULL_PATH_DELIMITER]. Unique across the forest.
    pub fn full_path(&self) -> String {
        let mut names = vec![self.name.clone()];
        let mut current = self.parent.upgrade();
        while let Some(node) = current {
            names.push(node.name.clone());
            current = node.parent.upgrade();
        }
        names.reverse();
        names.join(FULL_PATH_DELIMITER)
    }

    /// Number of archives between this node and its root. Roots have 0.
    pub fn nesting_factor(&self) -> usize {
        let mut n = 0;
        let mut current = self.parent.upgrade();
        while let Some(node) = current {
            n += 1;
            current = node.parent.upgrade();
        }
        n
    }

    /// Final path component of `name`, the key used by the basename
    /// lookup table.
    pub fn basename(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Structural equality: identity, content and subtree, ignoring the
/// parent edge and any transient staging state.
impl PartialEq for VirtualFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.hash == other.hash
            && self.size == other.size
            && self.last_modified == other.last_modified
            && *self.children.read() == *other.children.read()
    }
}

impl Eq for VirtualFile {}

/// Modification time of `metadata` in nanoseconds since the Unix epoch,
/// or [None] when the platform or filesystem cannot provide one.
pub fn mtime_nanos(metadata: &std::fs::Metadata) -> Option<u64> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
}
