use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::SourceKind;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Date parsing error: {0}")]
    DateParse(#[from] chrono::ParseError),

    #[error("Invalid observation time '{time}': {reason}")]
    InvalidObservationTime { time: String, reason: String },

    #[error("Missing {system} source file: {}", .path.display())]
    MissingSourceFile { path: PathBuf, system: SourceKind },

    #[error("Missing T-{lag} snapshot: {}", .path.display())]
    MissingLagSnapshot { path: PathBuf, lag: u32 },

    #[error("Station {station_id} is not in the master station list")]
    StationMismatch { station_id: String },

    #[error("Grid index ({row}, {col}) is outside a {rows}x{cols} grid")]
    OutOfBoundsIndex {
        row: i64,
        col: i64,
        rows: usize,
        cols: usize,
    },

    #[error("Parquet write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Feature schema error: {0}")]
    Schema(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Async task error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    /// Failures that only invalidate the current timestamp; a batch moves on to the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProcessingError::InvalidObservationTime { .. }
                | ProcessingError::MissingSourceFile { .. }
                | ProcessingError::MissingLagSnapshot { .. }
                | ProcessingError::StationMismatch { .. }
                | ProcessingError::InvalidFormat(_)
                | ProcessingError::InvalidGrid(_)
        )
    }

    /// Attribute a read or decode failure to the input file it came from.
    ///
    /// I/O, CSV, date and NetCDF errors while reading one input become `InvalidFormat`
    /// naming the file, so only that timestamp fails. Errors raised while writing outputs
    /// must not go through here.
    pub fn in_input(self, path: &Path) -> Self {
        match self {
            ProcessingError::InvalidFormat(reason) => {
                ProcessingError::InvalidFormat(format!("{}: {}", path.display(), reason))
            }
            e @ (ProcessingError::Io(_)
            | ProcessingError::Csv(_)
            | ProcessingError::DateParse(_)) => {
                ProcessingError::InvalidFormat(format!("{}: {}", path.display(), e))
            }
            #[cfg(feature = "netcdf")]
            e @ ProcessingError::NetCdf(_) => {
                ProcessingError::InvalidFormat(format!("{}: {}", path.display(), e))
            }
            other => other,
        }
    }
}
