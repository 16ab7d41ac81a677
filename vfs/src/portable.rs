use serde::{Deserialize, Serialize};

use crate::FileHash;

/// Externally attested file: the path components from a root down to a
/// member (one component for the root itself), plus the content hash of
/// the final component. Carries topology without requiring extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownFile {
    pub path: Vec<String>,
    pub hash: FileHash,
}

impl KnownFile {
    pub fn new(path: Vec<String>, hash: FileHash) -> Self {
        Self { path, hash }
    }
}

/// Compact, machine-portable record of one forest node.
///
/// `name` is the basename for nodes inside an archive and [None] for
/// roots, whose real path is local to the producing machine and gets
/// re-resolved through a link map on the consuming side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableFile {
    pub name: Option<String>,
    pub hash: FileHash,
    pub parent_hash: Option<FileHash>,
    pub size: u64,
}

mod hash_serde {
    //! [FileHash] crosses machines in its `b3:<base64>` rendering.

    use data_encoding::BASE64;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::FileHash;

    impl Serialize for FileHash {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for FileHash {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            let b64 = s
                .strip_prefix("b3:")
                .ok_or_else(|| D::Error::custom("hash must start with b3:"))?;
            let bytes = BASE64
                .decode(b64.as_bytes())
                .map_err(|e| D::Error::custom(format!("invalid base64: {}", e)))?;
            FileHash::try_from(bytes.as_slice()).map_err(D::Error::custom)
        }
    }
}
