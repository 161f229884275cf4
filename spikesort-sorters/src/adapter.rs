//! Sorter adapter contract
//!
//! One [`SorterAdapter`] per external spike sorting tool. The adapter knows
//! how to stage a recording into the tool's input layout, invoke the tool, and
//! parse whatever the tool leaves in its output folder. Everything else
//! (partitioning, folders, parallelism, result assembly, cleanup) belongs to
//! [`crate::lifecycle::SorterLifecycle`].

use crate::error::Result;
use crate::params::ParamSet;
use async_trait::async_trait;
use spikesort_common::{PropertyValue, Recording, Sorting};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One slice of a recording sorted on its own
#[derive(Debug, Clone)]
pub struct Partition {
    /// Ordinal position (0-based) among the run's partitions
    pub index: usize,
    pub recording: Arc<dyn Recording>,
    /// Working directory owned by this partition
    pub output_folder: PathBuf,
    /// Grouping property value shared by the partition's channels
    pub group: Option<PropertyValue>,
}

/// Everything an adapter reads while staging or running one partition
#[derive(Debug, Clone)]
pub struct SortJob {
    pub partition: Partition,
    pub params: Arc<ParamSet>,
    /// Resolved install folder of the external tool
    pub tool_path: Option<PathBuf>,
    pub verbose: bool,
}

impl SortJob {
    pub fn recording(&self) -> &dyn Recording {
        self.partition.recording.as_ref()
    }

    pub fn output_folder(&self) -> &Path {
        &self.partition.output_folder
    }
}

/// Bridge between the sorter lifecycle and one external tool
#[async_trait]
pub trait SorterAdapter: Send + Sync {
    /// Registry key, e.g. `kilosort2`
    fn name(&self) -> &str;

    /// Shown verbatim when the tool is not installed
    fn installation_message(&self) -> &str;

    /// Sorter needs `location` on every channel
    fn requires_locations(&self) -> bool {
        false
    }

    /// Declared defaults; also the set of legal parameter names
    fn default_params(&self) -> ParamSet;

    /// Environment variable holding the tool's install folder
    fn install_env_var(&self) -> Option<&str> {
        None
    }

    /// Whether the tool is usable from `path`
    fn check_installed(&self, path: Option<&Path>) -> bool;

    /// Tool version, when it can be determined
    async fn version(&self, _path: Option<&Path>) -> Option<String> {
        None
    }

    /// Write input data and configuration files into the job's folder
    ///
    /// Called from tokio's blocking thread pool, one partition at a time.
    fn setup_recording(&self, job: &SortJob) -> Result<()>;

    /// Invoke the external tool and wait for it to finish
    async fn run(&self, job: &SortJob) -> Result<()>;

    /// Parse native output, `None` when the folder holds no recognizable result
    fn get_result_from_folder(&self, folder: &Path) -> Result<Option<Box<dyn Sorting>>>;
}

/// Strip one pair of surrounding double quotes from a configured path
pub fn unquote_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => PathBuf::from(inner),
        None => path.to_path_buf(),
    }
}

/// True when `path` (unquoted) contains the marker file
pub fn has_marker_file(path: Option<&Path>, marker: &str) -> bool {
    path.map(|p| unquote_path(p).join(marker).is_file())
        .unwrap_or(false)
}
