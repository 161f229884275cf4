//! phy output folders
//!
//! Kilosort-family tools export results in the phy layout:
//! - `spike_times.npy`: spike frame of every spike
//! - `spike_clusters.npy`: cluster id of every spike (falls back to
//!   `spike_templates.npy` when clustering was never curated)
//! - `cluster_KSLabel.tsv`: optional `good`/`mua` label per cluster
//! - `params.py`: optional, provides `sample_rate`

use crate::error::{Result, SorterError};
use crate::tools::npy::read_npy_i64;
use spikesort_common::{InMemorySorting, PropertyValue, Sorting};
use std::path::Path;
use tracing::debug;

/// Unit property holding the Kilosort cluster label
pub const QUALITY_PROPERTY: &str = "quality";

/// Load a phy folder, `None` when it holds no `spike_times.npy`
pub fn read_phy_folder(folder: &Path) -> Result<Option<InMemorySorting>> {
    let times_path = folder.join("spike_times.npy");
    if !times_path.is_file() {
        debug!(folder = %folder.display(), "No spike_times.npy");
        return Ok(None);
    }
    let spike_times = read_npy_i64(&times_path)?;

    let clusters_path = folder.join("spike_clusters.npy");
    let labels_path = if clusters_path.is_file() {
        clusters_path
    } else {
        folder.join("spike_templates.npy")
    };
    if !labels_path.is_file() {
        return Err(SorterError::Parse(format!(
            "{}: spike_times.npy without spike_clusters.npy or spike_templates.npy",
            folder.display()
        )));
    }
    let labels = read_npy_i64(&labels_path)?
        .into_iter()
        .map(|l| {
            u32::try_from(l).map_err(|_| {
                SorterError::Parse(format!("{}: invalid cluster id {}", labels_path.display(), l))
            })
        })
        .collect::<Result<Vec<u32>>>()?;

    let mut sorting = InMemorySorting::from_labels(&spike_times, &labels)?;

    let ks_labels = folder.join("cluster_KSLabel.tsv");
    if ks_labels.is_file() {
        let content = std::fs::read_to_string(&ks_labels)?;
        for (cluster, label) in parse_cluster_labels(&content) {
            // Labels for clusters without spikes are ignored
            if sorting.unit_spike_train(cluster).is_some() {
                sorting.set_unit_property(cluster, QUALITY_PROPERTY, PropertyValue::from(label))?;
            }
        }
    }

    let params = folder.join("params.py");
    if params.is_file() {
        if let Some(rate) = parse_sample_rate(&std::fs::read_to_string(&params)?) {
            sorting.set_sampling_frequency(rate);
        }
    }

    debug!(
        folder = %folder.display(),
        units = sorting.num_units(),
        spikes = spike_times.len(),
        "Read phy output"
    );
    Ok(Some(sorting))
}

/// `cluster_id<TAB>label` rows after the header line
pub fn parse_cluster_labels(content: &str) -> Vec<(u32, String)> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let id = cols.next()?.trim().parse().ok()?;
            let label = cols.next()?.trim();
            (!label.is_empty()).then(|| (id, label.to_string()))
        })
        .collect()
}

/// `sample_rate = 30000.` from a phy `params.py`
pub fn parse_sample_rate(content: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "sample_rate" {
            return None;
        }
        value.trim().trim_end_matches('.').parse().ok()
    })
}
