//! Error types for spikesort-sorters

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring, running or collecting a sorter
#[derive(Error, Debug)]
pub enum SorterError {
    /// External tool is not installed; raised before any filesystem work
    #[error("{sorter} is not installed\n{message}")]
    Installation { sorter: String, message: String },

    /// Recording does not satisfy the sorter's preconditions
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parameter overrides name keys the sorter does not declare
    #[error("Bad parameters: {}", .bad_params.join(", "))]
    Validation { bad_params: Vec<String> },

    /// Parameter has a value of the wrong type
    #[error("Parameter '{name}' must be {expected}")]
    InvalidParamValue { name: String, expected: String },

    /// External process exited unsuccessfully
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Sorter finished but left no recognizable output
    #[error("{sorter} produced no output in {}", .folder.display())]
    NoOutput { sorter: String, folder: PathBuf },

    /// Parallel partition task panicked or was cancelled
    #[error("Partition {partition} task failed: {reason}")]
    TaskFailed { partition: usize, reason: String },

    /// No sorter registered under this name or adapter
    #[error("Unknown sorter: {0}")]
    UnknownSorter(String),

    /// Output folder could not be parsed
    #[error("Output parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] spikesort_common::Error),
}

pub type Result<T> = std::result::Result<T, SorterError>;
