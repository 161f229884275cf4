//! # spikesort common library
//!
//! Shared code for the spike sorter orchestration workspace:
//! - Recording and sorting collaborator traits
//! - In-memory recording/sorting implementations and multi-sorting merge
//! - Raw binary recording loader and probe files
//! - Configuration loading
//! - Common error type

pub mod bindat;
pub mod config;
pub mod error;
pub mod probe;
pub mod property;
pub mod recording;
pub mod sorting;

pub use error::{Error, Result};
pub use property::PropertyValue;
pub use recording::{InMemoryRecording, Recording, Traces};
pub use sorting::{InMemorySorting, MultiSorting, Sorting, SortingSummary};
