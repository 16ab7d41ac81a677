//! A virtual file system index for modlist assembly tooling.
//!
//! Files on disk are enumerated, hashed and, when they turn out to be
//! archives, extracted and descended into recursively. The resulting
//! forest of real and virtual files is indexed by content hash, full
//! path and basename, can be staged back onto disk on demand, and round
//! trips through a binary cache so unchanged files are never re-hashed.

mod digests;
mod errors;

pub mod analysis;
pub mod cache;
pub mod config;
pub mod extractor;
pub mod fixtures;
pub mod staging;

mod context;
mod file;
mod index;
mod portable;

pub use config::VfsConfig;
pub use context::Context;
pub use digests::{FileHash, HASH_LEN};
pub use errors::Error;
pub use file::{VirtualFile, FULL_PATH_DELIMITER};
pub use index::IndexRoot;
pub use portable::{KnownFile, PortableFile};

#[cfg(test)]
mod tests;
