//! Sorting result collaborator interface
//!
//! A [`Sorting`] is the unified result of one sorter run: unit ids, their
//! spike trains, per-unit properties and the sampling frequency the spike
//! frames refer to. [`MultiSorting`] merges several sortings into one.

use crate::property::PropertyValue;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Sorting result produced by a tool adapter
pub trait Sorting: Send + Sync + fmt::Debug {
    /// Unit ids in ascending order
    fn unit_ids(&self) -> Vec<u32>;

    /// Spike frames of one unit, `None` for an unknown unit
    fn unit_spike_train(&self, unit_id: u32) -> Option<Vec<i64>>;

    /// Property names set on one unit
    fn unit_property_names(&self, unit_id: u32) -> Vec<String>;

    fn unit_property(&self, unit_id: u32, name: &str) -> Option<PropertyValue>;

    fn set_unit_property(&mut self, unit_id: u32, name: &str, value: PropertyValue) -> Result<()>;

    fn sampling_frequency(&self) -> Option<f64>;

    fn set_sampling_frequency(&mut self, sampling_frequency: f64);

    fn num_units(&self) -> usize {
        self.unit_ids().len()
    }
}

#[derive(Debug, Clone, Default)]
struct UnitData {
    spike_train: Vec<i64>,
    properties: BTreeMap<String, PropertyValue>,
}

/// Sorting held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySorting {
    units: BTreeMap<u32, UnitData>,
    sampling_frequency: Option<f64>,
}

impl InMemorySorting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sorting from parallel spike-time and unit-label arrays
    ///
    /// Spike trains keep the order of `spike_times`.
    pub fn from_labels(spike_times: &[i64], labels: &[u32]) -> Result<Self> {
        if spike_times.len() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "{} spike times but {} labels",
                spike_times.len(),
                labels.len()
            )));
        }
        let mut sorting = Self::new();
        for (time, label) in spike_times.iter().zip(labels) {
            sorting
                .units
                .entry(*label)
                .or_default()
                .spike_train
                .push(*time);
        }
        Ok(sorting)
    }

    /// Insert or replace a unit's spike train
    pub fn add_unit(&mut self, unit_id: u32, spike_train: Vec<i64>) {
        self.units.entry(unit_id).or_default().spike_train = spike_train;
    }
}

impl Sorting for InMemorySorting {
    fn unit_ids(&self) -> Vec<u32> {
        self.units.keys().copied().collect()
    }

    fn unit_spike_train(&self, unit_id: u32) -> Option<Vec<i64>> {
        self.units.get(&unit_id).map(|u| u.spike_train.clone())
    }

    fn unit_property_names(&self, unit_id: u32) -> Vec<String> {
        self.units
            .get(&unit_id)
            .map(|u| u.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn unit_property(&self, unit_id: u32, name: &str) -> Option<PropertyValue> {
        self.units
            .get(&unit_id)
            .and_then(|u| u.properties.get(name).cloned())
    }

    fn set_unit_property(&mut self, unit_id: u32, name: &str, value: PropertyValue) -> Result<()> {
        let unit = self
            .units
            .get_mut(&unit_id)
            .ok_or_else(|| Error::NotFound(format!("unit {}", unit_id)))?;
        unit.properties.insert(name.to_string(), value);
        Ok(())
    }

    fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    fn set_sampling_frequency(&mut self, sampling_frequency: f64) {
        self.sampling_frequency = Some(sampling_frequency);
    }
}

/// Union of several sortings
///
/// Units are renumbered `0..n` in input order (all units of the first
/// sorting, then the second, ...). Property reads and writes go through to the
/// owning sorting, so tags set before the merge are preserved.
#[derive(Debug)]
pub struct MultiSorting {
    sortings: Vec<Box<dyn Sorting>>,
    unit_map: Vec<(usize, u32)>,
    sampling_frequency: Option<f64>,
}

impl MultiSorting {
    pub fn new(sortings: Vec<Box<dyn Sorting>>) -> Self {
        let unit_map = sortings
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.unit_ids().into_iter().map(move |u| (i, u)))
            .collect();
        let sampling_frequency = sortings.iter().find_map(|s| s.sampling_frequency());
        Self {
            sortings,
            unit_map,
            sampling_frequency,
        }
    }

    pub fn sortings(&self) -> &[Box<dyn Sorting>] {
        &self.sortings
    }

    /// Which input sorting and original unit id a merged unit came from
    pub fn source_of(&self, unit_id: u32) -> Option<(usize, u32)> {
        self.unit_map.get(unit_id as usize).copied()
    }
}

impl Sorting for MultiSorting {
    fn unit_ids(&self) -> Vec<u32> {
        (0..self.unit_map.len() as u32).collect()
    }

    fn unit_spike_train(&self, unit_id: u32) -> Option<Vec<i64>> {
        let (i, u) = self.source_of(unit_id)?;
        self.sortings[i].unit_spike_train(u)
    }

    fn unit_property_names(&self, unit_id: u32) -> Vec<String> {
        self.source_of(unit_id)
            .map(|(i, u)| self.sortings[i].unit_property_names(u))
            .unwrap_or_default()
    }

    fn unit_property(&self, unit_id: u32, name: &str) -> Option<PropertyValue> {
        let (i, u) = self.source_of(unit_id)?;
        self.sortings[i].unit_property(u, name)
    }

    fn set_unit_property(&mut self, unit_id: u32, name: &str, value: PropertyValue) -> Result<()> {
        let (i, u) = self
            .source_of(unit_id)
            .ok_or_else(|| Error::NotFound(format!("unit {}", unit_id)))?;
        self.sortings[i].set_unit_property(u, name, value)
    }

    fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    fn set_sampling_frequency(&mut self, sampling_frequency: f64) {
        self.sampling_frequency = Some(sampling_frequency);
        for sorting in &mut self.sortings {
            sorting.set_sampling_frequency(sampling_frequency);
        }
    }
}

/// Serializable overview of a sorting
#[derive(Debug, Clone, Serialize)]
pub struct SortingSummary {
    pub sampling_frequency: Option<f64>,
    pub num_units: usize,
    pub units: Vec<UnitSummary>,
}

/// Serializable overview of one unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub unit_id: u32,
    pub num_spikes: usize,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl SortingSummary {
    pub fn from_sorting(sorting: &dyn Sorting) -> Self {
        let units: Vec<UnitSummary> = sorting
            .unit_ids()
            .into_iter()
            .map(|unit_id| UnitSummary {
                unit_id,
                num_spikes: sorting.unit_spike_train(unit_id).map_or(0, |t| t.len()),
                properties: sorting
                    .unit_property_names(unit_id)
                    .into_iter()
                    .filter_map(|name| {
                        sorting.unit_property(unit_id, &name).map(|v| (name, v))
                    })
                    .collect(),
            })
            .collect();
        Self {
            sampling_frequency: sorting.sampling_frequency(),
            num_units: units.len(),
            units,
        }
    }
}
