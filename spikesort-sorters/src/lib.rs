//! # spikesort sorters
//!
//! Runs external spike sorting tools behind one lifecycle:
//! configure → stage input → invoke tool → parse output.
//!
//! - [`adapter`]: per-tool contract ([`SorterAdapter`])
//! - [`lifecycle`]: partitioning, execution and result assembly ([`SorterLifecycle`])
//! - [`registry`]: name-based dispatch and installation state ([`SorterRegistry`])
//! - [`kilosort`], [`kilosort2`]: built-in MATLAB tool adapters
//! - [`tools`]: subprocess, binary, NPY/phy and template helpers

pub mod adapter;
pub mod error;
pub mod kilosort;
pub mod kilosort2;
pub mod lifecycle;
pub mod params;
pub mod registry;
pub mod tools;

pub use adapter::{Partition, SortJob, SorterAdapter};
pub use error::{Result, SorterError};
pub use lifecycle::{LifecycleState, SorterLifecycle, SorterOptions};
pub use params::ParamSet;
pub use registry::{
    available_sorters, get_default_params, installed_sorters, run_kilosort, run_kilosort2,
    run_sorter, Installation, SorterRef, SorterRegistry,
};
