use std::path::PathBuf;

use serde::Deserialize;

/// Default number of concurrent analysis workers.
const DEFAULT_ANALYSIS_PARALLELISM: usize = 16;

/// Default capacity of the queue between the filesystem walker and the
/// analysis workers.
const DEFAULT_ANALYSIS_QUEUE_DEPTH: usize = 1024;

/// Tunables for a [crate::Context].
///
/// All fields have defaults, so a config file only needs to name the
/// values it wants to override.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VfsConfig {
    /// How many files are analyzed concurrently during a scan.
    pub analysis_parallelism: usize,

    /// How many enumerated paths may sit between the directory walker
    /// and the analysis workers before the walker blocks.
    pub analysis_queue_depth: usize,

    /// Directory under which every scratch directory is allocated, both
    /// for analysis-time extraction and for staging.
    pub staging_root: PathBuf,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            analysis_parallelism: DEFAULT_ANALYSIS_PARALLELISM,
            analysis_queue_depth: DEFAULT_ANALYSIS_QUEUE_DEPTH,
            staging_root: PathBuf::from("vfs_staging"),
        }
    }
}
