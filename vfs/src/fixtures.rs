//! Shared test data and scripted collaborators.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::extractor::ArchiveExtractor;
use crate::FileHash;

pub const HELLOWORLD_BLOB_CONTENTS: &[u8] = b"Hello World!";
pub const EMPTY_BLOB_CONTENTS: &[u8] = b"";

lazy_static! {
    pub static ref HELLOWORLD_BLOB_HASH: FileHash =
        blake3::hash(HELLOWORLD_BLOB_CONTENTS).as_bytes().into();
    pub static ref EMPTY_BLOB_HASH: FileHash =
        blake3::hash(EMPTY_BLOB_CONTENTS).as_bytes().into();

    // two bytes, fits any read buffer
    pub static ref BLOB_A: bytes::Bytes = vec![0x00, 0x01].into();
    pub static ref BLOB_A_HASH: FileHash = blake3::hash(&BLOB_A).as_bytes().into();

    // about 1MB, large enough to span several hashing chunks
    pub static ref BLOB_B: bytes::Bytes = (0..255).collect::<Vec<u8>>().repeat(4 * 1024).into();
    pub static ref BLOB_B_HASH: FileHash = blake3::hash(&BLOB_B).as_bytes().into();
}

/// Decorator recording every archive handed to the inner extractor, in
/// call order. Lets tests assert extraction ordering.
pub struct RecordingExtractor<E> {
    inner: E,
    extracted: Mutex<Vec<PathBuf>>,
}

impl<E> RecordingExtractor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            extracted: Mutex::new(Vec::new()),
        }
    }

    /// Paths of the archives extracted so far, in order.
    pub fn extracted(&self) -> Vec<PathBuf> {
        self.extracted.lock().clone()
    }
}

#[async_trait]
impl<E: ArchiveExtractor> ArchiveExtractor for RecordingExtractor<E> {
    async fn extract(&self, archive: &Path, target: &Path) -> io::Result<()> {
        self.extracted.lock().push(archive.to_path_buf());
        self.inner.extract(archive, target).await
    }
}

/// An extractor that rejects everything, for failure-path tests.
pub struct FailingExtractor;

#[async_trait]
impl ArchiveExtractor for FailingExtractor {
    async fn extract(&self, archive: &Path, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not an archive", archive.display()),
        ))
    }
}
