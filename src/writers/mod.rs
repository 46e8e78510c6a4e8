pub mod csv_writer;
pub mod parquet_writer;

pub use csv_writer::CsvWriter;
pub use parquet_writer::{ParquetFileInfo, ParquetWriter};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::models::TabularData;

/// On-disk format of lag-window feature tables. Snapshots are always CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Writes tables in the configured format.
#[derive(Default)]
pub struct TableWriter {
    format: OutputFormat,
    csv: CsvWriter,
    parquet: ParquetWriter,
}

impl TableWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_parquet(mut self, parquet: ParquetWriter) -> Self {
        self.parquet = parquet;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn write<T: TabularData>(&self, table: &T, path: &Path) -> Result<()> {
        match self.format {
            OutputFormat::Csv => self.csv.write(table, path),
            OutputFormat::Parquet => self.parquet.write_table(table, path),
        }
    }
}

/// Runs `write` against a temporary file next to `path` and renames it into place only
/// once `write` succeeds, so readers never see a partial table.
pub(crate) fn persist_atomically(
    path: &Path,
    write: impl FnOnce(&mut File) -> Result<()>,
) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
