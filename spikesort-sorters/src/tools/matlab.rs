//! Shared plumbing for MATLAB-hosted sorters

use crate::error::{Result, SorterError};
use crate::tools::command::{call_command, ToolCommand};
use spikesort_common::Recording;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const WRITE_NPY_M: &str = include_str!("../../templates/npy/writeNPY.m");
const CONSTRUCT_NPY_HEADER_M: &str = include_str!("../../templates/npy/constructNPYheader.m");

/// MATLAB executable
pub const MATLAB_PROGRAM: &str = "matlab";

/// `matlab -nosplash -nodisplay -r "run <script>; quit;"`
///
/// Windows additionally needs `-wait`, otherwise matlab returns immediately.
pub fn matlab_command(script: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(MATLAB_PROGRAM)
        .arg("-nosplash")
        .arg("-nodisplay");
    if cfg!(windows) {
        cmd = cmd.arg("-wait");
    }
    cmd.arg("-r")
        .arg(format!("run {}; quit;", script.display()))
}

/// Run a staged master script, exposing the tool folder through `env_var`
pub async fn run_matlab_script(
    script: &Path,
    env_var: &str,
    tool_path: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let mut cmd = matlab_command(script);
    if let Some(folder) = script.parent() {
        cmd = cmd.current_dir(folder);
    }
    if let Some(path) = tool_path {
        cmd = cmd.env(env_var, path.as_os_str());
    }
    call_command(&cmd, verbose).await
}

/// Copy the NPY export helpers next to the staged scripts
pub fn write_npy_helpers(folder: &Path) -> Result<()> {
    std::fs::write(folder.join("writeNPY.m"), WRITE_NPY_M)?;
    std::fs::write(folder.join("constructNPYheader.m"), CONSTRUCT_NPY_HEADER_M)?;
    Ok(())
}

/// Channel layout written to a Kilosort channel map script
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap {
    pub xcoords: Vec<f64>,
    pub ycoords: Vec<f64>,
    /// Shank/group index per channel (`kcoords`)
    pub kcoords: Vec<i64>,
}

impl ChannelMap {
    /// Build from channel `group` and `location` properties
    ///
    /// Missing groups become `1` everywhere. Missing locations become a linear
    /// layout `[0, i]`, in which case `electrode_dimensions` is ignored.
    pub fn from_recording(
        recording: &dyn Recording,
        electrode_dimensions: Option<&[usize]>,
    ) -> Result<Self> {
        let n = recording.num_channels();
        let kcoords = recording.channel_groups().unwrap_or_else(|| vec![1; n]);

        let (positions, dims) = match recording.channel_locations() {
            Some(locations) => (locations, electrode_dimensions.unwrap_or(&[0, 1]).to_vec()),
            None => {
                info!("'location' information is not found. Using linear configuration");
                let linear = (0..n).map(|i| vec![0.0, i as f64]).collect();
                (linear, vec![0, 1])
            }
        };

        if dims.len() < 2 {
            return Err(SorterError::Configuration(format!(
                "electrode_dimensions needs two indices, got {:?}",
                dims
            )));
        }
        let column = |d: usize| -> Result<Vec<f64>> {
            positions
                .iter()
                .map(|p| {
                    p.get(d).copied().ok_or_else(|| {
                        SorterError::Configuration(format!(
                            "electrode dimension {} outside {}-D channel locations",
                            d,
                            p.len()
                        ))
                    })
                })
                .collect()
        };

        let map = Self {
            xcoords: column(dims[0])?,
            ycoords: column(dims[1])?,
            kcoords,
        };
        debug!(channels = n, dims = ?dims, "Built channel map");
        Ok(map)
    }
}

/// Absolute form of a staged path for use inside generated scripts
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|d| d.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
