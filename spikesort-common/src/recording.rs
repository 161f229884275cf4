//! Recording collaborator interface
//!
//! A [`Recording`] exposes everything the sorter lifecycle and the tool
//! adapters read from an electrophysiology recording: channel ids, sampling
//! frequency, per-channel properties (`group`, `location`, ...), raw traces
//! over an arbitrary frame range, and channel-restricted sub-recordings.
//!
//! Recordings are shared read-only (`Arc<dyn Recording>`); sub-recordings are
//! views and never mutate their parent.

use crate::property::{PropertyValue, GROUP_PROPERTY, LOCATION_PROPERTY};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Raw traces for a set of channels, stored channel by channel
#[derive(Debug, Clone, PartialEq)]
pub struct Traces {
    channels: Vec<Vec<f32>>,
}

impl Traces {
    /// Build traces from per-channel sample vectors
    ///
    /// All channels must have the same number of frames.
    pub fn new(channels: Vec<Vec<f32>>) -> Result<Self> {
        if let Some(first) = channels.first() {
            let n = first.len();
            if let Some(bad) = channels.iter().position(|c| c.len() != n) {
                return Err(Error::InvalidInput(format!(
                    "channel {} has {} frames, expected {}",
                    bad,
                    channels[bad].len(),
                    n
                )));
            }
        }
        Ok(Self { channels })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|c| c.as_slice())
    }

    /// Iterate samples frame by frame (all channels of frame 0, then frame 1, ...)
    pub fn iter_sample_major(&self) -> impl Iterator<Item = f32> + '_ {
        let n_frames = self.num_frames();
        (0..n_frames).flat_map(move |frame| self.channels.iter().map(move |c| c[frame]))
    }

    pub fn min(&self) -> Option<f32> {
        self.channels
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc, x| Some(acc.map_or(x, |m: f32| m.min(x))))
    }

    pub fn max(&self) -> Option<f32> {
        self.channels
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc, x| Some(acc.map_or(x, |m: f32| m.max(x))))
    }

    pub fn max_abs(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0_f32, |acc, x| acc.max(x.abs()))
    }

    /// True when every sample has no fractional part
    pub fn is_integral(&self) -> bool {
        self.channels.iter().flatten().all(|x| x.fract() == 0.0)
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

/// Recording collaborator consumed by the sorter lifecycle
pub trait Recording: Send + Sync + fmt::Debug {
    /// Channel ids in channel order
    fn channel_ids(&self) -> Vec<u32>;

    /// Sampling frequency in Hz
    fn sampling_frequency(&self) -> f64;

    /// Number of frames (samples per channel)
    fn num_frames(&self) -> usize;

    /// Property names defined on one channel
    fn channel_property_names(&self, channel_id: u32) -> Vec<String>;

    /// Property value of one channel, `None` if unset
    fn channel_property(&self, channel_id: u32, name: &str) -> Option<PropertyValue>;

    /// Traces of `channel_ids` over frames `[start_frame, end_frame)`
    fn traces(&self, channel_ids: &[u32], start_frame: usize, end_frame: usize) -> Result<Traces>;

    /// Channel-restricted view of this recording
    fn select_channels(&self, channel_ids: &[u32]) -> Result<Arc<dyn Recording>>;

    fn num_channels(&self) -> usize {
        self.channel_ids().len()
    }

    /// Property names defined on every channel
    fn shared_channel_property_names(&self) -> Vec<String> {
        let ids = self.channel_ids();
        let Some((first, rest)) = ids.split_first() else {
            return Vec::new();
        };
        let mut names = self.channel_property_names(*first);
        for id in rest {
            let other = self.channel_property_names(*id);
            names.retain(|n| other.contains(n));
        }
        names.sort();
        names
    }

    /// All traces of all channels
    fn all_traces(&self) -> Result<Traces> {
        self.traces(&self.channel_ids(), 0, self.num_frames())
    }

    /// Channel groups, `None` unless every channel has an integer `group`
    fn channel_groups(&self) -> Option<Vec<i64>> {
        self.channel_ids()
            .into_iter()
            .map(|id| self.channel_property(id, GROUP_PROPERTY).and_then(|v| v.as_i64()))
            .collect()
    }

    /// Channel locations, `None` unless every channel has a vector `location`
    fn channel_locations(&self) -> Option<Vec<Vec<f64>>> {
        self.channel_ids()
            .into_iter()
            .map(|id| {
                self.channel_property(id, LOCATION_PROPERTY)
                    .and_then(|v| v.as_vector().map(|s| s.to_vec()))
            })
            .collect()
    }

    /// View restricted to the channels whose property `name` equals `value`
    fn sub_recording_by_property(
        &self,
        name: &str,
        value: &PropertyValue,
    ) -> Result<Arc<dyn Recording>> {
        let ids: Vec<u32> = self
            .channel_ids()
            .into_iter()
            .filter(|id| self.channel_property(*id, name).as_ref() == Some(value))
            .collect();
        if ids.is_empty() {
            return Err(Error::NotFound(format!(
                "no channel has property '{}' = {}",
                name, value
            )));
        }
        self.select_channels(&ids)
    }
}

/// Distinct values of channel property `name`, ascending
///
/// Fails if any channel lacks the property.
pub fn distinct_property_values(recording: &dyn Recording, name: &str) -> Result<Vec<PropertyValue>> {
    let mut values: Vec<PropertyValue> = Vec::new();
    for id in recording.channel_ids() {
        let value = recording.channel_property(id, name).ok_or_else(|| {
            Error::InvalidInput(format!("channel {} has no property '{}'", id, name))
        })?;
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Ok(values)
}

/// Split a recording into one sub-recording per distinct value of `name`
///
/// Sub-recordings are returned in ascending property value order, paired with
/// that value.
pub fn sub_recordings_by_property(
    recording: &dyn Recording,
    name: &str,
) -> Result<Vec<(PropertyValue, Arc<dyn Recording>)>> {
    distinct_property_values(recording, name)?
        .into_iter()
        .map(|value| {
            let sub = recording.sub_recording_by_property(name, &value)?;
            Ok((value, sub))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct ChannelData {
    id: u32,
    samples: Arc<Vec<f32>>,
    properties: BTreeMap<String, PropertyValue>,
}

/// Recording held entirely in memory
///
/// Channel-restricted views share the sample buffers of their parent.
#[derive(Debug, Clone)]
pub struct InMemoryRecording {
    sampling_frequency: f64,
    num_frames: usize,
    channels: Vec<ChannelData>,
}

impl InMemoryRecording {
    /// Create a recording from per-channel samples; channel ids are `0..n`
    pub fn new(traces: Vec<Vec<f32>>, sampling_frequency: f64) -> Result<Self> {
        if !(sampling_frequency > 0.0) {
            return Err(Error::InvalidInput(format!(
                "sampling frequency must be positive, got {}",
                sampling_frequency
            )));
        }
        let traces = Traces::new(traces)?;
        let num_frames = traces.num_frames();
        let channels = traces
            .into_channels()
            .into_iter()
            .enumerate()
            .map(|(i, samples)| ChannelData {
                id: i as u32,
                samples: Arc::new(samples),
                properties: BTreeMap::new(),
            })
            .collect();
        Ok(Self {
            sampling_frequency,
            num_frames,
            channels,
        })
    }

    /// Replace channel ids (must be unique, one per channel)
    pub fn with_channel_ids(mut self, ids: &[u32]) -> Result<Self> {
        if ids.len() != self.channels.len() {
            return Err(Error::InvalidInput(format!(
                "{} channel ids given for {} channels",
                ids.len(),
                self.channels.len()
            )));
        }
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != ids.len() {
            return Err(Error::InvalidInput("channel ids must be unique".to_string()));
        }
        for (channel, id) in self.channels.iter_mut().zip(ids) {
            channel.id = *id;
        }
        Ok(self)
    }

    fn channel_mut(&mut self, channel_id: u32) -> Result<&mut ChannelData> {
        self.channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {}", channel_id)))
    }

    pub fn set_channel_property(
        &mut self,
        channel_id: u32,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.channel_mut(channel_id)?
            .properties
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Set `group` on every channel, in channel order
    pub fn set_channel_groups(&mut self, groups: &[i64]) -> Result<()> {
        if groups.len() != self.channels.len() {
            return Err(Error::InvalidInput(format!(
                "{} groups given for {} channels",
                groups.len(),
                self.channels.len()
            )));
        }
        for (channel, group) in self.channels.iter_mut().zip(groups) {
            channel
                .properties
                .insert(GROUP_PROPERTY.to_string(), PropertyValue::Int(*group));
        }
        Ok(())
    }

    /// Set `location` on every channel, in channel order
    pub fn set_channel_locations(&mut self, locations: &[Vec<f64>]) -> Result<()> {
        if locations.len() != self.channels.len() {
            return Err(Error::InvalidInput(format!(
                "{} locations given for {} channels",
                locations.len(),
                self.channels.len()
            )));
        }
        for (channel, location) in self.channels.iter_mut().zip(locations) {
            channel.properties.insert(
                LOCATION_PROPERTY.to_string(),
                PropertyValue::Vector(location.clone()),
            );
        }
        Ok(())
    }

    pub fn into_shared(self) -> Arc<dyn Recording> {
        Arc::new(self)
    }

    fn channel(&self, channel_id: u32) -> Option<&ChannelData> {
        self.channels.iter().find(|c| c.id == channel_id)
    }
}

impl Recording for InMemoryRecording {
    fn channel_ids(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.id).collect()
    }

    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_frames(&self) -> usize {
        self.num_frames
    }

    fn channel_property_names(&self, channel_id: u32) -> Vec<String> {
        self.channel(channel_id)
            .map(|c| c.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn channel_property(&self, channel_id: u32, name: &str) -> Option<PropertyValue> {
        self.channel(channel_id)
            .and_then(|c| c.properties.get(name).cloned())
    }

    fn traces(&self, channel_ids: &[u32], start_frame: usize, end_frame: usize) -> Result<Traces> {
        if start_frame > end_frame || end_frame > self.num_frames {
            return Err(Error::InvalidInput(format!(
                "frame range {}..{} outside recording of {} frames",
                start_frame, end_frame, self.num_frames
            )));
        }
        let channels = channel_ids
            .iter()
            .map(|id| {
                self.channel(*id)
                    .map(|c| c.samples[start_frame..end_frame].to_vec())
                    .ok_or_else(|| Error::NotFound(format!("channel {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        Traces::new(channels)
    }

    fn select_channels(&self, channel_ids: &[u32]) -> Result<Arc<dyn Recording>> {
        let channels = channel_ids
            .iter()
            .map(|id| {
                self.channel(*id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("channel {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Self {
            sampling_frequency: self.sampling_frequency,
            num_frames: self.num_frames,
            channels,
        }))
    }
}
