//! Kilosort (MATLAB, cortex-lab/KiloSort)
//!
//! Staging writes an autoscaled int16 `recording.dat`, a channel map script,
//! a config script and a master script into the partition folder; running
//! executes the master script in a headless MATLAB session, which exports phy
//! output next to it.

use crate::adapter::{has_marker_file, unquote_path, SortJob, SorterAdapter};
use crate::error::{Result, SorterError};
use crate::params::ParamSet;
use crate::tools::binary::{write_binary_int16, Int16Scaling};
use crate::tools::command::git_short_hash;
use crate::tools::matlab::{absolute, run_matlab_script, write_npy_helpers, ChannelMap};
use crate::tools::phy::read_phy_folder;
use crate::tools::template::{matlab_path, matlab_vector, render};
use async_trait::async_trait;
use serde_json::json;
use spikesort_common::bindat::TimeAxis;
use spikesort_common::Sorting;
use std::path::Path;
use tracing::debug;

const MASTER_TEMPLATE: &str = include_str!("../../templates/kilosort/kilosort_master.m");
const CONFIG_TEMPLATE: &str = include_str!("../../templates/kilosort/kilosort_config.m");
const CHANNELMAP_TEMPLATE: &str = include_str!("../../templates/kilosort/kilosort_channelmap.m");

pub const SORTER_NAME: &str = "kilosort";
pub const PATH_ENV_VAR: &str = "KILOSORT_PATH";

/// File that identifies a Kilosort checkout
const MARKER_FILE: &str = "preprocessData.m";

const INSTALLATION_MESSAGE: &str = "\
To use Kilosort run:

    git clone https://github.com/cortex-lab/KiloSort

and provide the installation path with the KILOSORT_PATH environment
variable, `[sorters.kilosort] path` in the config file, or
`SorterRegistry::set_install_path`.

More information on KiloSort at:
    https://github.com/cortex-lab/KiloSort
";

/// Number of templates: 8 per channel, rounded down to a multiple of 32 channels
pub fn n_filt(num_channels: usize) -> usize {
    match (num_channels / 32) * 32 * 8 {
        0 => num_channels * 8,
        n => n,
    }
}

/// Batch size in samples
pub const NT: usize = 128 * 1024 + 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct KilosortAdapter;

#[async_trait]
impl SorterAdapter for KilosortAdapter {
    fn name(&self) -> &str {
        SORTER_NAME
    }

    fn installation_message(&self) -> &str {
        INSTALLATION_MESSAGE
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::from_pairs([
            ("detect_threshold", json!(6)),
            ("car", json!(true)),
            ("useGPU", json!(true)),
            ("electrode_dimensions", json!(null)),
            ("freq_min", json!(300)),
            ("freq_max", json!(6000)),
        ])
    }

    fn install_env_var(&self) -> Option<&str> {
        Some(PATH_ENV_VAR)
    }

    fn check_installed(&self, path: Option<&Path>) -> bool {
        has_marker_file(path, MARKER_FILE)
    }

    async fn version(&self, path: Option<&Path>) -> Option<String> {
        git_short_hash(&unquote_path(path?)).await
    }

    fn setup_recording(&self, job: &SortJob) -> Result<()> {
        let tool_path = job
            .tool_path
            .as_deref()
            .filter(|p| self.check_installed(Some(*p)))
            .map(|p| absolute(&unquote_path(p)))
            .ok_or_else(|| SorterError::Installation {
                sorter: SORTER_NAME.to_string(),
                message: INSTALLATION_MESSAGE.to_string(),
            })?;

        let p = &job.params;
        let recording = job.recording();
        let folder = absolute(job.output_folder());

        let dims = p.get_index_list("electrode_dimensions")?;
        let channel_map = ChannelMap::from_recording(recording, dims.as_deref())?;

        let dat_file = write_binary_int16(
            recording,
            &folder.join("recording"),
            Int16Scaling::Autoscale,
            TimeAxis::SampleMajor,
        )?;

        let nchan = recording.num_channels();
        let sample_rate = recording.sampling_frequency().to_string();
        let use_gpu = u8::from(p.get_bool("useGPU")?);
        let use_car = u8::from(p.get_bool("car")?);

        let master = render(
            MASTER_TEMPLATE,
            &[
                ("kilosort_path", matlab_path(&tool_path)),
                ("output_folder", matlab_path(&folder)),
                ("channel_path", matlab_path(&folder.join("kilosort_channelmap.m"))),
                ("config_path", matlab_path(&folder.join("kilosort_config.m"))),
                ("useGPU", use_gpu.to_string()),
            ],
        )?;

        let config = render(
            CONFIG_TEMPLATE,
            &[
                ("nchanTOT", nchan.to_string()),
                ("nchan", nchan.to_string()),
                ("sample_rate", sample_rate.clone()),
                ("dat_file", matlab_path(&dat_file)),
                ("Nfilt", n_filt(nchan).to_string()),
                ("Nt", NT.to_string()),
                ("kilo_thresh", p.get_f64("detect_threshold")?.to_string()),
                ("use_car", use_car.to_string()),
                ("freq_min", p.get_f64("freq_min")?.to_string()),
                ("freq_max", p.get_f64("freq_max")?.to_string()),
            ],
        )?;

        let channelmap = render(
            CHANNELMAP_TEMPLATE,
            &[
                ("nchan", nchan.to_string()),
                ("sample_rate", sample_rate),
                ("xcoords", matlab_vector(&channel_map.xcoords)),
                ("ycoords", matlab_vector(&channel_map.ycoords)),
                ("kcoords", matlab_vector(&channel_map.kcoords)),
            ],
        )?;

        std::fs::write(folder.join("kilosort_master.m"), master)?;
        std::fs::write(folder.join("kilosort_config.m"), config)?;
        std::fs::write(folder.join("kilosort_channelmap.m"), channelmap)?;
        write_npy_helpers(&folder)?;

        debug!(
            sorter = SORTER_NAME,
            partition = job.partition.index,
            folder = %folder.display(),
            "Staged recording"
        );
        Ok(())
    }

    async fn run(&self, job: &SortJob) -> Result<()> {
        let script = absolute(job.output_folder()).join("kilosort_master.m");
        run_matlab_script(&script, PATH_ENV_VAR, job.tool_path.as_deref(), job.verbose).await
    }

    fn get_result_from_folder(&self, folder: &Path) -> Result<Option<Box<dyn Sorting>>> {
        Ok(read_phy_folder(folder)?.map(|s| Box::new(s) as Box<dyn Sorting>))
    }
}
