//! Kilosort2 (MATLAB, MouseLand/Kilosort2)
//!
//! Same staging flow as Kilosort with its own scripts. The int16 recording is
//! written unscaled when the samples already fit int16 exactly.

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

const MASTER_TEMPLATE: &str = include_str!("../../templates/kilosort2/kilosort2_master.m");
const CONFIG_TEMPLATE: &str = include_str!("../../templates/kilosort2/kilosort2_config.m");
const CHANNELMAP_TEMPLATE: &str = include_str!("../../templates/kilosort2/kilosort2_channelmap.m");

pub const SORTER_NAME: &str = "kilosort2";
pub const PATH_ENV_VAR: &str = "KILOSORT2_PATH";

const MARKER_FILE: &str = "master_kilosort.m";

const INSTALLATION_MESSAGE: &str = "\
To use Kilosort2 run:

    git clone https://github.com/MouseLand/Kilosort2

and provide the installation path with the KILOSORT2_PATH environment
variable, `[sorters.kilosort2] path` in the config file, or
`SorterRegistry::set_install_path`.

More information on Kilosort2 at:
    https://github.com/MouseLand/Kilosort2
";

#[derive(Debug, Clone, Copy, Default)]
pub struct Kilosort2Adapter;

impl Kilosort2Adapter {
    fn installation_error() -> SorterError {
        SorterError::Installation {
            sorter: SORTER_NAME.to_string(),
            message: INSTALLATION_MESSAGE.to_string(),
        }
    }
}

#[async_trait]
impl SorterAdapter for Kilosort2Adapter {
    fn name(&self) -> &str {
        SORTER_NAME
    }

    fn installation_message(&self) -> &str {
        INSTALLATION_MESSAGE
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::from_pairs([
            ("detect_threshold", json!(5)),
            ("car", json!(true)),
            ("minFR", json!(0.1)),
            ("electrode_dimensions", json!(null)),
            ("freq_min", json!(150)),
            ("sigmaMask", json!(30)),
            ("nPCs", json!(3)),
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
        let Some(tool_path) = job.tool_path.as_deref() else {
            return Err(Self::installation_error());
        };
        if !self.check_installed(Some(tool_path)) {
            return Err(Self::installation_error());
        }
        let tool_path = absolute(&unquote_path(tool_path));

        let p = &job.params;
        let recording = job.recording();
        let folder = absolute(job.output_folder());

        let channel_map = ChannelMap::from_recording(
            recording,
            p.get_index_list("electrode_dimensions")?.as_deref(),
        )?;

        let dat_file = write_binary_int16(
            recording,
            &folder.join("recording"),
            Int16Scaling::IfNeeded,
            TimeAxis::SampleMajor,
        )?;

        let nchan = recording.num_channels().to_string();
        let sample_rate = recording.sampling_frequency().to_string();

        let master = render(
            MASTER_TEMPLATE,
            &[
                ("kilosort2_path", matlab_path(&tool_path)),
                ("output_folder", matlab_path(&folder)),
                ("channel_path", matlab_path(&folder.join("kilosort2_channelmap.m"))),
                ("config_path", matlab_path(&folder.join("kilosort2_config.m"))),
            ],
        )?;

        let config = render(
            CONFIG_TEMPLATE,
            &[
                ("nchan", nchan.clone()),
                ("sample_rate", sample_rate.clone()),
                ("dat_file", matlab_path(&dat_file)),
                ("minFR", p.get_f64("minFR")?.to_string()),
                ("freq_min", p.get_f64("freq_min")?.to_string()),
                ("sigmaMask", p.get_f64("sigmaMask")?.to_string()),
                ("kilo_thresh", p.get_f64("detect_threshold")?.to_string()),
                ("use_car", u8::from(p.get_bool("car")?).to_string()),
                ("nPCs", p.get_i64("nPCs")?.to_string()),
            ],
        )?;

        let channelmap = render(
            CHANNELMAP_TEMPLATE,
            &[
                ("nchan", nchan),
                ("sample_rate", sample_rate),
                ("xcoords", matlab_vector(&channel_map.xcoords)),
                ("ycoords", matlab_vector(&channel_map.ycoords)),
                ("kcoords", matlab_vector(&channel_map.kcoords)),
            ],
        )?;

        for (name, content) in [
            ("kilosort2_master.m", master),
            ("kilosort2_config.m", config),
            ("kilosort2_channelmap.m", channelmap),
        ] {
            std::fs::write(folder.join(name), content)?;
        }
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
        let script = absolute(job.output_folder()).join("kilosort2_master.m");
        run_matlab_script(&script, PATH_ENV_VAR, job.tool_path.as_deref(), job.verbose).await
    }

    fn get_result_from_folder(&self, folder: &Path) -> Result<Option<Box<dyn Sorting>>> {
        Ok(read_phy_folder(folder)?.map(|s| Box::new(s) as Box<dyn Sorting>))
    }
}
