use std::path::Path;

use crate::error::Result;
use crate::models::TabularData;
use crate::utils::constants::DEFAULT_BUFFER_SIZE;
use crate::writers::persist_atomically;

/// Flat CSV tables: optional `time`, identity columns from the master list, then features.
/// Missing values are written as empty fields.
#[derive(Debug, Clone, Default)]
pub struct CsvWriter;

impl CsvWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn write<T: TabularData>(&self, table: &T, path: &Path) -> Result<()> {
        persist_atomically(path, |file| {
            let mut writer = csv::WriterBuilder::new()
                .buffer_capacity(DEFAULT_BUFFER_SIZE)
                .from_writer(file);
            writer.write_record(table.header())?;

            let time = table.time_label();
            let data = table.data();
            let mut record: Vec<String> = Vec::with_capacity(table.header().len());
            for (row, station) in data.stations().iter().enumerate() {
                record.clear();
                record.extend(time.iter().cloned());
                record.push(station.id.clone());
                record.push(station.lon.to_string());
                record.push(station.lat.to_string());
                record.push(station.height.to_string());
                record.extend(
                    data.columns()
                        .iter()
                        .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
                );
                writer.write_record(&record)?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}
