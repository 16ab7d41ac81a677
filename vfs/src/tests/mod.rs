use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::extractor::{ExtensionDetector, TarExtractor};
use crate::{Context, VfsConfig};

mod scan;

/// Writes a tarball at `dest` containing the given `(member, contents)`
/// entries. Member names may contain directories.
pub(crate) async fn write_tar(dest: &Path, entries: &[(&str, Vec<u8>)]) -> std::io::Result<()> {
    let file = tokio::fs::File::create(dest).await?;
    let mut builder = tokio_tar::Builder::new(file);

    for (name, data) in entries {
        let mut header = tokio_tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).await?;
    }

    let mut file = builder.into_inner().await?;
    file.flush().await?;
    Ok(())
}

/// A context staging into `staging_root`, with the stock tar
/// collaborators.
pub(crate) fn tar_context(staging_root: &Path) -> Context {
    Context::with_collaborators(
        VfsConfig {
            staging_root: staging_root.to_path_buf(),
            ..Default::default()
        },
        Arc::new(TarExtractor),
        Arc::new(ExtensionDetector::default()),
    )
    .expect("context must build")
}
