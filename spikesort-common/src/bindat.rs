//! Raw binary recordings
//!
//! Loads headerless binary files (`.dat`, `.bin`, `.raw`) into an
//! [`InMemoryRecording`]. The caller supplies channel count, sampling
//! frequency, sample type and layout; the file carries samples only.

use crate::recording::InMemoryRecording;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Sample type of a raw binary file (little endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Int16,
    Uint16,
    Int32,
    Float32,
    Float64,
}

impl DType {
    /// Bytes per sample
    pub fn size(&self) -> usize {
        match self {
            DType::Int16 | DType::Uint16 => 2,
            DType::Int32 | DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            DType::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            DType::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            DType::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            DType::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            DType::Float64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(buf) as f32
            }
        }
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int16" | "i2" | "<i2" => Ok(DType::Int16),
            "uint16" | "u2" | "<u2" => Ok(DType::Uint16),
            "int32" | "i4" | "<i4" => Ok(DType::Int32),
            "float32" | "f4" | "<f4" => Ok(DType::Float32),
            "float64" | "f8" | "<f8" => Ok(DType::Float64),
            other => Err(Error::InvalidInput(format!("unsupported dtype '{}'", other))),
        }
    }
}

/// Sample layout of a raw binary file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAxis {
    /// Frame-interleaved: all channels of frame 0, then frame 1, ...
    #[default]
    SampleMajor,
    /// Channel blocks: every frame of channel 0, then channel 1, ...
    ChannelMajor,
}

impl FromStr for TimeAxis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "sample_major" => Ok(TimeAxis::SampleMajor),
            "1" | "channel_major" => Ok(TimeAxis::ChannelMajor),
            other => Err(Error::InvalidInput(format!("unsupported time axis '{}'", other))),
        }
    }
}

/// Description of a raw binary file
#[derive(Debug, Clone)]
pub struct BinDatOptions {
    pub num_channels: usize,
    pub sampling_frequency: f64,
    pub dtype: DType,
    pub time_axis: TimeAxis,
    /// Bytes to skip at the start of the file
    pub offset: usize,
}

impl BinDatOptions {
    pub fn new(num_channels: usize, sampling_frequency: f64) -> Self {
        Self {
            num_channels,
            sampling_frequency,
            dtype: DType::default(),
            time_axis: TimeAxis::default(),
            offset: 0,
        }
    }
}

/// Decode raw bytes into per-channel samples
pub fn decode_samples(bytes: &[u8], options: &BinDatOptions) -> Result<Vec<Vec<f32>>> {
    if options.num_channels == 0 {
        return Err(Error::InvalidInput("num_channels must be at least 1".to_string()));
    }
    let payload = bytes.get(options.offset..).ok_or_else(|| {
        Error::Format(format!(
            "offset {} beyond file of {} bytes",
            options.offset,
            bytes.len()
        ))
    })?;
    let size = options.dtype.size();
    let frame_bytes = size * options.num_channels;
    if payload.len() % frame_bytes != 0 {
        return Err(Error::Format(format!(
            "{} data bytes is not a multiple of {} channels x {} bytes",
            payload.len(),
            options.num_channels,
            size
        )));
    }
    let num_frames = payload.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(num_frames); options.num_channels];

    for (i, chunk) in payload.chunks_exact(size).enumerate() {
        let value = options.dtype.decode(chunk);
        let channel = match options.time_axis {
            TimeAxis::SampleMajor => i % options.num_channels,
            TimeAxis::ChannelMajor => i / num_frames,
        };
        channels[channel].push(value);
    }
    Ok(channels)
}

/// Load a raw binary file as an in-memory recording
pub fn load_bin_dat(path: &Path, options: &BinDatOptions) -> Result<InMemoryRecording> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    let channels = decode_samples(&bytes, options)?;

    debug!(
        path = %path.display(),
        num_channels = options.num_channels,
        num_frames = channels.first().map_or(0, |c| c.len()),
        dtype = ?options.dtype,
        "Loaded binary recording"
    );

    InMemoryRecording::new(channels, options.sampling_frequency)
}
