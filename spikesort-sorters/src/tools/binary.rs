//! int16 `.dat` writer
//!
//! Tools in the Kilosort family read a headerless little-endian int16 file,
//! frame-interleaved (sample-major).

use crate::error::Result;
use spikesort_common::bindat::TimeAxis;
use spikesort_common::{Recording, Traces};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Target peak amplitude after rescaling
const SCALED_PEAK: f32 = 16384.0; // 2^14

/// How samples are brought into int16 range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Int16Scaling {
    /// Always rescale so the largest magnitude maps to 2^14
    Autoscale,
    /// Rescale only when values overflow int16 or are non-integral
    IfNeeded,
}

/// Scale factor applied before the int16 cast
pub fn scale_factor(traces: &Traces, scaling: Int16Scaling) -> f32 {
    let max_abs = traces.max_abs();
    let rescale = match scaling {
        Int16Scaling::Autoscale => true,
        Int16Scaling::IfNeeded => {
            let min = traces.min().unwrap_or(0.0);
            let max = traces.max().unwrap_or(0.0);
            min < i16::MIN as f32 || max >= 32768.0 || !traces.is_integral()
        }
    };
    if rescale && max_abs > 0.0 {
        SCALED_PEAK / max_abs
    } else {
        1.0
    }
}

/// Append `.dat` when the path has no extension
pub fn dat_path(path: &Path) -> PathBuf {
    if path.extension().is_none() {
        let mut name = path.as_os_str().to_os_string();
        name.push(".dat");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    }
}

/// Write every trace of `recording` as int16
///
/// Returns the path actually written.
pub fn write_binary_int16(
    recording: &dyn Recording,
    path: &Path,
    scaling: Int16Scaling,
    time_axis: TimeAxis,
) -> Result<PathBuf> {
    let path = dat_path(path);
    let traces = recording.all_traces()?;
    let factor = scale_factor(&traces, scaling);

    let mut writer = BufWriter::new(File::create(&path)?);
    let mut write_sample = |x: f32| writer.write_all(&((x * factor) as i16).to_le_bytes());

    match time_axis {
        TimeAxis::SampleMajor => {
            for x in traces.iter_sample_major() {
                write_sample(x)?;
            }
        }
        TimeAxis::ChannelMajor => {
            for c in 0..traces.num_channels() {
                for &x in traces.channel(c).unwrap_or(&[]) {
                    write_sample(x)?;
                }
            }
        }
    }
    writer.flush()?;

    debug!(
        path = %path.display(),
        channels = traces.num_channels(),
        frames = traces.num_frames(),
        scale = factor,
        "Wrote int16 binary"
    );
    Ok(path)
}
