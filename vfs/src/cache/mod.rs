//! Binary cache of the file forest.
//!
//! Layout: an 18 byte magic, a u64 version word, a u64 root count, then
//! one `{ u64 length ; payload }` record per root. A record payload is
//! the root node serialized recursively, children inline after a child
//! count. All integers are little-endian and nothing is padded.
//!
//! Readers validate the magic and version against the constants below
//! and reject anything else. Structural problems surface as
//! [std::io::ErrorKind::InvalidData]; callers translate that into their
//! own format error.

use std::io::{Error, ErrorKind};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::digests::HASH_LEN;
use crate::{FileHash, VirtualFile};

pub const MAGIC: &[u8; 18] = b"WABBAJACK VFS FILE";
pub const VERSION: u64 = 2;

/// Upper bound on a single record's encoded size. A length prefix above
/// this is treated as corruption rather than allocated blindly.
const MAX_RECORD_LEN: u64 = 1 << 30;

/// Serializes the given roots into `w`.
#[instrument(skip_all, fields(roots = roots.len()))]
pub async fn write_index<W>(w: &mut W, roots: &[Arc<VirtualFile>]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(MAGIC).await?;
    w.write_u64_le(VERSION).await?;
    w.write_u64_le(roots.len() as u64).await?;

    for root in roots {
        let mut buf = Vec::new();
        root.write_to(&mut buf);
        w.write_u64_le(buf.len() as u64).await?;
        w.write_all(&buf).await?;
    }

    Ok(())
}

/// Reads a forest back from `r`, one record buffer at a time.
#[instrument(skip_all, err)]
pub async fn read_index<R>(r: &mut R) -> std::io::Result<Vec<Arc<VirtualFile>>>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; MAGIC.len()];
    r.read_exact(&mut magic).await?;
    if magic != *MAGIC {
        return Err(invalid_data("magic mismatch"));
    }

    let version = r.read_u64_le().await?;
    if version != VERSION {
        return Err(invalid_data(format!(
            "unsupported version {} (expected {})",
            version, VERSION
        )));
    }

    let count = r.read_u64_le().await?;
    debug!(count, "reading cached roots");

    let mut roots = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let len = r.read_u64_le().await?;
        if len > MAX_RECORD_LEN {
            return Err(invalid_data(format!(
                "record length {} exceeds the {} byte cap",
                len, MAX_RECORD_LEN
            )));
        }
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf).await?;
        roots.push(VirtualFile::read_from(&buf)?);
    }

    Ok(roots)
}

impl VirtualFile {
    /// Serializes this node and its subtree into `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        put_bytes(buf, self.name().as_bytes());

        match self.hash() {
            Some(hash) => {
                put_u64(buf, 1);
                buf.extend_from_slice(hash.as_slice());
            }
            None => put_u64(buf, 0),
        }

        put_u64(buf, self.size());

        match self.last_modified() {
            Some(mtime) => {
                put_u64(buf, 1);
                put_u64(buf, mtime);
            }
            None => put_u64(buf, 0),
        }

        let children = self.children();
        put_u64(buf, children.len() as u64);
        for child in children {
            child.write_to(buf);
        }
    }

    /// Inverse of [VirtualFile::write_to]. Parent links are rebuilt on
    /// the way down. Trailing garbage after the subtree is rejected.
    pub fn read_from(bytes: &[u8]) -> std::io::Result<Arc<VirtualFile>> {
        let mut buf = bytes;
        let node = decode_node(&mut buf, None)?;
        if !buf.is_empty() {
            return Err(invalid_data("trailing bytes after record"));
        }
        Ok(node)
    }
}

fn decode_node(
    buf: &mut &[u8],
    parent: Option<&Arc<VirtualFile>>,
) -> std::io::Result<Arc<VirtualFile>> {
    let name = String::from_utf8(get_bytes(buf)?)
        .map_err(|e| invalid_data(format!("name is not UTF-8: {}", e)))?;

    let hash = match get_u64(buf)? {
        0 => None,
        _ => {
            let raw = get_exact(buf, HASH_LEN)?;
            Some(FileHash::try_from(raw).map_err(|e| invalid_data(format!("bad hash: {}", e)))?)
        }
    };

    let size = get_u64(buf)?;

    let last_modified = match get_u64(buf)? {
        0 => None,
        _ => Some(get_u64(buf)?),
    };

    let node = match parent {
        None => VirtualFile::new_root(name, hash, size, last_modified),
        Some(parent) => VirtualFile::new_child(parent, name, hash, size),
    };

    let child_count = get_u64(buf)?;
    // every child occupies at least four u64 fields, so a count larger
    // than the remaining buffer is corruption
    if child_count > buf.len() as u64 {
        return Err(invalid_data("child count exceeds record size"));
    }
    for _ in 0..child_count {
        let child = decode_node(buf, Some(&node))?;
        node.attach_child(child);
    }

    Ok(node)
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    put_u64(buf, b.len() as u64);
    buf.extend_from_slice(b);
}

fn get_u64(buf: &mut &[u8]) -> std::io::Result<u64> {
    let raw = get_exact(buf, 8)?;
    let mut le = [0u8; 8];
    le.copy_from_slice(raw);
    Ok(u64::from_le_bytes(le))
}

fn get_bytes(buf: &mut &[u8]) -> std::io::Result<Vec<u8>> {
    let len = get_u64(buf)?;
    if len > buf.len() as u64 {
        return Err(invalid_data("length prefix exceeds record size"));
    }
    Ok(get_exact(buf, len as usize)?.to_vec())
}

fn get_exact<'a>(buf: &mut &'a [u8], n: usize) -> std::io::Result<&'a [u8]> {
    if buf.len() < n {
        return Err(invalid_data("truncated record"));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn invalid_data(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests {
    use super::{read_index, write_index, MAGIC, VERSION};
    use crate::fixtures::{BLOB_A_HASH, BLOB_B_HASH};
    use crate::VirtualFile;

    fn nested_root() -> std::sync::Arc<VirtualFile> {
        let root = VirtualFile::new_root(
            "/data/outer.tar".into(),
            Some(BLOB_A_HASH.clone()),
            64,
            Some(123_456_789),
        );
        let mid = VirtualFile::new_child(&root, "middle.tar".into(), Some(BLOB_B_HASH.clone()), 32);
        root.attach_child(mid.clone());
        let leaf = VirtualFile::new_child(&mid, "leaf.txt".into(), Some(BLOB_A_HASH.clone()), 5);
        mid.attach_child(leaf);
        root
    }

    #[tokio::test]
    async fn round_trips_a_nested_forest() {
        let roots = vec![
            nested_root(),
            VirtualFile::new_root("/data/a.bin".into(), Some(BLOB_B_HASH.clone()), 2, Some(77)),
        ];

        let mut sink = Vec::new();
        write_index(&mut sink, &roots).await.expect("must write");

        let read = read_index(&mut std::io::Cursor::new(sink))
            .await
            .expect("must read");
        assert_eq!(roots, read);

        // parent links are rebuilt
        let mid = read[0].children()[0].clone();
        assert!(std::sync::Arc::ptr_eq(&mid.parent().unwrap(), &read[0]));
    }

    #[tokio::test]
    async fn rejects_wrong_magic() {
        let mut sink = Vec::new();
        write_index(&mut sink, &[]).await.expect("must write");
        sink[0] ^= 0xff;

        let err = read_index(&mut std::io::Cursor::new(sink))
            .await
            .expect_err("must reject");
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind());
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let mut sink = Vec::new();
        sink.extend_from_slice(MAGIC);
        sink.extend_from_slice(&(VERSION + 1).to_le_bytes());
        sink.extend_from_slice(&0u64.to_le_bytes());

        read_index(&mut std::io::Cursor::new(sink))
            .await
            .expect_err("must reject");
    }

    #[tokio::test]
    async fn rejects_truncated_record() {
        let mut sink = Vec::new();
        write_index(&mut sink, &[nested_root()]).await.expect("must write");
        sink.truncate(sink.len() - 3);

        read_index(&mut std::io::Cursor::new(sink))
            .await
            .expect_err("must reject");
    }

    #[tokio::test]
    async fn empty_forest_round_trips() {
        let mut sink = Vec::new();
        write_index(&mut sink, &[]).await.expect("must write");
        let read = read_index(&mut std::io::Cursor::new(sink))
            .await
            .expect("must read");
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn header_is_magic_then_version_then_count() {
        let mut source = tokio_test::io::Builder::new()
            .read(MAGIC)
            .read(&VERSION.to_le_bytes())
            .read(&0u64.to_le_bytes())
            .build();

        let read = read_index(&mut source).await.expect("must read");
        assert!(read.is_empty());

        let mut sink = Vec::new();
        write_index(&mut sink, &[]).await.expect("must write");
        let mut expected = MAGIC.to_vec();
        expected.extend_from_slice(&VERSION.to_le_bytes());
        expected.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(expected, sink);
    }

    #[tokio::test]
    async fn absurd_record_lengths_are_rejected_before_allocation() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());

        let err = read_index(&mut std::io::Cursor::new(bytes))
            .await
            .expect_err("must reject");
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind());
    }
}
