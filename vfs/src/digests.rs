use data_encoding::BASE64;
use thiserror::Error;

/// Width of a content hash in bytes.
pub const HASH_LEN: usize = 32;

/// Content hash over a file's full byte stream.
///
/// Equal contents mean equal hashes wherever the file sits in the
/// forest, which is the whole basis of the hash lookup table. Rendered
/// as `b3:` followed by the base64 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHash([u8; HASH_LEN]);

#[derive(Debug, Error)]
pub enum Error {
    #[error("a hash is {HASH_LEN} bytes, got {0}")]
    WrongLength(usize),
}

impl FileHash {
    /// Hashes `data` in one go. Meant for fixtures and small in-memory
    /// payloads; file analysis streams contents chunk by chunk instead.
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8; HASH_LEN]> for FileHash {
    fn from(raw: &[u8; HASH_LEN]) -> Self {
        Self(*raw)
    }
}

/// Checked conversion for hash bytes coming off the wire.
impl TryFrom<&[u8]> for FileHash {
    type Error = Error;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        match raw.try_into() {
            Ok(exact) => Ok(Self(exact)),
            Err(_) => Err(Error::WrongLength(raw.len())),
        }
    }
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b3:{}", BASE64.encode(&self.0))
    }
}

impl std::fmt::Debug for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileHash({})", self)
    }
}
