//! Test helper utilities
//!
//! [`MockSorter`] is an in-process adapter that records every call, writes a
//! tiny JSON result per partition, and can be told to fail, produce nothing,
//! or take a while for chosen partitions.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use spikesort_common::{InMemoryRecording, InMemorySorting, Recording, Sorting};
use spikesort_sorters::adapter::{has_marker_file, SortJob, SorterAdapter};
use spikesort_sorters::{ParamSet, Result, SorterError};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

pub const MOCK_MARKER: &str = "mock_sorter.marker";
const RESULT_FILE: &str = "units.json";

/// Lifecycle call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Setup(usize),
    RunStart(usize),
    RunEnd(usize),
}

pub struct MockSorter {
    name: String,
    always_installed: bool,
    requires_locations: bool,
    fail: HashSet<usize>,
    empty: HashSet<usize>,
    delays: HashMap<usize, Duration>,
    events: Mutex<Vec<Event>>,
    setup_threads: Mutex<Vec<ThreadId>>,
}

impl MockSorter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            always_installed: true,
            requires_locations: false,
            fail: HashSet::new(),
            empty: HashSet::new(),
            delays: HashMap::new(),
            events: Mutex::new(Vec::new()),
            setup_threads: Mutex::new(Vec::new()),
        }
    }

    /// Installed only when the install folder holds [`MOCK_MARKER`]
    pub fn with_marker_install(mut self) -> Self {
        self.always_installed = false;
        self
    }

    pub fn requiring_locations(mut self) -> Self {
        self.requires_locations = true;
        self
    }

    pub fn failing_on(mut self, partition: usize) -> Self {
        self.fail.insert(partition);
        self
    }

    pub fn empty_on(mut self, partition: usize) -> Self {
        self.empty.insert(partition);
        self
    }

    pub fn delay_on(mut self, partition: usize, delay: Duration) -> Self {
        self.delays.insert(partition, delay);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Threads `setup_recording` ran on, in call order
    pub fn setup_threads(&self) -> Vec<ThreadId> {
        self.setup_threads.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl SorterAdapter for MockSorter {
    fn name(&self) -> &str {
        &self.name
    }

    fn installation_message(&self) -> &str {
        "install the mock sorter"
    }

    fn requires_locations(&self) -> bool {
        self.requires_locations
    }

    fn default_params(&self) -> ParamSet {
        ParamSet::from_pairs([("a", json!(0)), ("b", json!("x"))])
    }

    fn install_env_var(&self) -> Option<&str> {
        Some("MOCK_SORTER_PATH")
    }

    fn check_installed(&self, path: Option<&Path>) -> bool {
        self.always_installed || has_marker_file(path, MOCK_MARKER)
    }

    fn setup_recording(&self, job: &SortJob) -> Result<()> {
        self.record(Event::Setup(job.partition.index));
        self.setup_threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        let staged = json!({
            "channels": job.recording().channel_ids(),
            "a": job.params.get("a"),
        });
        std::fs::write(job.output_folder().join("staged.json"), staged.to_string())?;
        Ok(())
    }

    async fn run(&self, job: &SortJob) -> Result<()> {
        let index = job.partition.index;
        self.record(Event::RunStart(index));
        if let Some(delay) = self.delays.get(&index) {
            tokio::time::sleep(*delay).await;
        }
        self.record(Event::RunEnd(index));

        if self.fail.contains(&index) {
            return Err(SorterError::ExternalTool {
                tool: self.name.clone(),
                status: "exit status: 1".to_string(),
                stderr: format!("partition {} failed", index),
            });
        }
        if self.empty.contains(&index) {
            return Ok(());
        }

        // One unit per channel; spike frames encode partition and channel
        let units: Vec<(u32, Vec<i64>)> = job
            .recording()
            .channel_ids()
            .into_iter()
            .map(|c| (c, vec![index as i64 * 1000 + c as i64]))
            .collect();
        std::fs::write(
            job.output_folder().join(RESULT_FILE),
            serde_json::to_string(&units).unwrap(),
        )?;
        Ok(())
    }

    fn get_result_from_folder(&self, folder: &Path) -> Result<Option<Box<dyn Sorting>>> {
        let path = folder.join(RESULT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let units: Vec<(u32, Vec<i64>)> =
            serde_json::from_str(&std::fs::read_to_string(path)?).unwrap();
        let mut sorting = InMemorySorting::new();
        for (unit, train) in units {
            sorting.add_unit(unit, train);
        }
        Ok(Some(Box::new(sorting)))
    }
}

/// Recording with one channel per entry of `groups`, 30 kHz, 100 frames
pub fn grouped_recording(groups: &[i64]) -> Arc<dyn Recording> {
    let traces = groups.iter().map(|_| vec![0.0; 100]).collect();
    let mut rec = InMemoryRecording::new(traces, 30000.0).unwrap();
    rec.set_channel_groups(groups).unwrap();
    rec.into_shared()
}

/// Recording without channel properties
pub fn plain_recording(num_channels: usize) -> Arc<dyn Recording> {
    InMemoryRecording::new(vec![vec![0.0; 100]; num_channels], 30000.0)
        .unwrap()
        .into_shared()
}
