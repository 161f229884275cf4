//! Sorter lifecycle
//!
//! Drives one adapter through `setup → run → collect → cleanup` for every
//! partition of a recording:
//!
//! 1. **Construction**: installation and precondition checks, partitioning by
//!    grouping property, eager creation of per-partition working folders
//! 2. **Run**: stage every partition in order, then run the external tool
//!    per partition, sequentially or as one tokio task per partition joined
//!    behind a single barrier
//! 3. **Collect**: parse every folder in partition order; a single partition
//!    is returned as is, several are tagged with `group` and merged
//! 4. **Cleanup** (optional): remove the working folders

use crate::adapter::{Partition, SortJob, SorterAdapter};
use crate::error::{Result, SorterError};
use crate::params::ParamSet;
use crate::registry::Installation;
use futures::future::join_all;
use serde_json::Value;
use spikesort_common::property::{GROUP_PROPERTY, LOCATION_PROPERTY};
use spikesort_common::recording::sub_recordings_by_property;
use spikesort_common::{MultiSorting, Recording, Sorting};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-run options shared by every sorter
#[derive(Debug, Clone, Default)]
pub struct SorterOptions {
    /// Base output folder, default `tmp_<sorter>` in the current directory
    pub output_folder: Option<PathBuf>,
    pub verbose: bool,
    /// Channel property to split the recording by (e.g. `group`)
    pub grouping_property: Option<String>,
    /// Run partitions concurrently
    pub parallel: bool,
    /// Remove working folders once results are collected
    pub delete_output_folder: bool,
}

/// Lifecycle progress
///
/// There is no separate partitioned state: [`SorterLifecycle::new`] splits
/// the recording and creates the partition folders before returning, so a
/// lifecycle starts out `Configured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Configured,
    Staged,
    Executing,
    Completed,
    Collected,
    Cleaned,
}

/// One sorter run over one recording
pub struct SorterLifecycle {
    adapter: Arc<dyn SorterAdapter>,
    tool_path: Option<PathBuf>,
    options: SorterOptions,
    output_folder: PathBuf,
    partitions: Vec<Partition>,
    params: ParamSet,
    state: LifecycleState,
}

impl SorterLifecycle {
    /// Check preconditions, partition the recording and create working folders
    ///
    /// Fails with [`SorterError::Installation`] before touching the filesystem
    /// when the tool is not installed.
    pub fn new(
        adapter: Arc<dyn SorterAdapter>,
        installation: Installation,
        recording: Arc<dyn Recording>,
        options: SorterOptions,
    ) -> Result<Self> {
        let name = adapter.name().to_string();

        if !installation.installed {
            return Err(SorterError::Installation {
                sorter: name,
                message: adapter.installation_message().to_string(),
            });
        }

        if adapter.requires_locations()
            && !recording
                .shared_channel_property_names()
                .iter()
                .any(|n| n == LOCATION_PROPERTY)
        {
            return Err(SorterError::Configuration(format!(
                "{} requires channel locations; load a probe file or set '{}' on every channel",
                name, LOCATION_PROPERTY
            )));
        }

        let output_folder = absolute_folder(
            options
                .output_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("tmp_{}", name))),
        )?;

        let parts: Vec<(Option<spikesort_common::PropertyValue>, Arc<dyn Recording>)> =
            match &options.grouping_property {
                None => vec![(None, recording)],
                Some(key) => sub_recordings_by_property(recording.as_ref(), key)
                    .map_err(|e| {
                        SorterError::Configuration(format!(
                            "cannot group by '{}': {}",
                            key, e
                        ))
                    })?
                    .into_iter()
                    .map(|(value, rec)| (Some(value), rec))
                    .collect(),
            };

        if parts.is_empty() {
            return Err(SorterError::Configuration(
                "recording has no channels to sort".to_string(),
            ));
        }

        let multiple = parts.len() > 1;
        let partitions: Vec<Partition> = parts
            .into_iter()
            .enumerate()
            .map(|(index, (group, recording))| Partition {
                index,
                recording,
                output_folder: if multiple {
                    output_folder.join(index.to_string())
                } else {
                    output_folder.clone()
                },
                group,
            })
            .collect();

        for partition in &partitions {
            std::fs::create_dir_all(&partition.output_folder)?;
            debug!(
                sorter = %name,
                partition = partition.index,
                channels = partition.recording.num_channels(),
                folder = %partition.output_folder.display(),
                "Created partition folder"
            );
        }

        let params = adapter.default_params();

        Ok(Self {
            adapter,
            tool_path: installation.path,
            options,
            output_folder,
            partitions,
            params,
            state: LifecycleState::Configured,
        })
    }

    pub fn sorter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Fresh copy of the adapter's declared defaults
    pub fn default_params(&self) -> ParamSet {
        self.adapter.default_params()
    }

    /// Apply parameter overrides as one batch
    ///
    /// Any unknown key rejects the whole batch with
    /// [`SorterError::Validation`] and nothing is applied.
    pub fn set_params<I, K>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.params.update_checked(overrides)
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    /// Stage every partition, then run the external tool on each
    ///
    /// Returns the time spent in the run phase (staging excluded).
    pub async fn run(&mut self) -> Result<Duration> {
        let params = Arc::new(self.params.clone());
        let jobs: Vec<SortJob> = self
            .partitions
            .iter()
            .map(|partition| SortJob {
                partition: partition.clone(),
                params: Arc::clone(&params),
                tool_path: self.tool_path.clone(),
                verbose: self.options.verbose,
            })
            .collect();

        // Staging writes whole recordings to disk
        let mut staged = Vec::with_capacity(jobs.len());
        for job in jobs {
            let adapter = Arc::clone(&self.adapter);
            let partition = job.partition.index;
            let job = tokio::task::spawn_blocking(move || {
                adapter.setup_recording(&job).map(|()| job)
            })
            .await
            .map_err(|e| SorterError::TaskFailed {
                partition,
                reason: e.to_string(),
            })??;
            staged.push(job);
        }
        let jobs = staged;
        self.state = LifecycleState::Staged;

        let start = Instant::now();
        self.state = LifecycleState::Executing;

        if self.options.parallel {
            self.run_parallel(jobs).await?;
        } else {
            for job in &jobs {
                self.adapter.run(job).await?;
            }
        }

        let elapsed = start.elapsed();
        self.state = LifecycleState::Completed;

        if self.options.verbose {
            info!("{} run time {:.2}s", self.sorter_name(), elapsed.as_secs_f64());
        } else {
            debug!(sorter = %self.sorter_name(), elapsed_secs = elapsed.as_secs_f64(), "Run complete");
        }

        Ok(elapsed)
    }

    async fn run_parallel(&self, jobs: Vec<SortJob>) -> Result<()> {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let adapter = Arc::clone(&self.adapter);
                tokio::spawn(async move { adapter.run(&job).await })
            })
            .collect();

        // Every task finishes before any failure is reported
        let outcomes = join_all(handles).await;

        let mut first_error = None;
        for (partition, joined) in outcomes.into_iter().enumerate() {
            let outcome = joined.unwrap_or_else(|e| {
                Err(SorterError::TaskFailed {
                    partition,
                    reason: e.to_string(),
                })
            });
            if let Err(e) = outcome {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(sorter = %self.sorter_name(), partition, error = %e, "Partition failed");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Parse every partition's folder, in partition order
    pub fn get_result_list(&mut self) -> Result<Vec<Option<Box<dyn Sorting>>>> {
        if self.state < LifecycleState::Completed {
            warn!(
                sorter = %self.sorter_name(),
                state = ?self.state,
                "Collecting results before run completed"
            );
        }

        let results = self
            .partitions
            .iter()
            .map(|p| self.adapter.get_result_from_folder(&p.output_folder))
            .collect::<Result<Vec<_>>>()?;

        self.state = LifecycleState::Collected;
        Ok(results)
    }

    /// Collect, assemble, optionally clean up, and stamp the sampling frequency
    pub fn get_result(&mut self) -> Result<Box<dyn Sorting>> {
        let results = self.get_result_list()?;
        let assembled = self.assemble(results);

        if self.options.delete_output_folder {
            self.cleanup();
        }

        let mut sorting = assembled?;
        sorting.set_sampling_frequency(self.partitions[0].recording.sampling_frequency());
        Ok(sorting)
    }

    fn assemble(&self, mut results: Vec<Option<Box<dyn Sorting>>>) -> Result<Box<dyn Sorting>> {
        if results.len() == 1 {
            return results.pop().flatten().ok_or_else(|| SorterError::NoOutput {
                sorter: self.sorter_name().to_string(),
                folder: self.partitions[0].output_folder.clone(),
            });
        }

        let mut kept = Vec::with_capacity(results.len());
        for (partition, result) in self.partitions.iter().zip(results) {
            let Some(mut sorting) = result else {
                debug!(sorter = %self.sorter_name(), partition = partition.index, "No output, skipping");
                continue;
            };
            if let Some(group) = &partition.group {
                for unit_id in sorting.unit_ids() {
                    sorting.set_unit_property(unit_id, GROUP_PROPERTY, group.clone())?;
                }
            }
            kept.push(sorting);
        }

        Ok(Box::new(MultiSorting::new(kept)))
    }

    fn cleanup(&mut self) {
        for partition in &self.partitions {
            if self.options.verbose {
                info!("Removing {}", partition.output_folder.display());
            }
            if let Err(e) = std::fs::remove_dir_all(&partition.output_folder) {
                if self.options.verbose {
                    warn!(folder = %partition.output_folder.display(), error = %e, "Remove failed");
                } else {
                    debug!(folder = %partition.output_folder.display(), error = %e, "Remove failed");
                }
            }
        }
        if self.partitions.len() > 1 {
            // Only succeeds once the base folder is empty
            let _ = std::fs::remove_dir(&self.output_folder);
        }
        self.state = LifecycleState::Cleaned;
    }
}

fn absolute_folder(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
