use crate::error::{ProcessingError, Result};
use crate::models::table::TIME_COLUMN;
use crate::models::{TabularData, IDENTITY_COLUMNS};
use crate::utils::constants::DEFAULT_ROW_GROUP_SIZE;
use crate::writers::persist_atomically;
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;

pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "lz4" => Compression::LZ4,
            "zstd" => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            "none" => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size;
        self
    }

    /// Write a snapshot or feature table; the file appears only once it is complete.
    pub fn write_table<T: TabularData>(&self, table: &T, path: &Path) -> Result<()> {
        let schema = self.create_schema(table);
        let batch = self.table_to_batch(table, schema.clone())?;

        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        persist_atomically(path, |file| {
            let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
            writer.write(&batch)?;
            writer.close()?;
            Ok(())
        })
    }

    /// `time` and `station_num` as strings, coordinates required, features nullable.
    fn create_schema<T: TabularData>(&self, table: &T) -> Arc<Schema> {
        let mut fields = Vec::new();
        if table.time_label().is_some() {
            fields.push(Field::new(TIME_COLUMN, DataType::Utf8, false));
        }
        fields.push(Field::new(IDENTITY_COLUMNS[0], DataType::Utf8, false));
        for name in &IDENTITY_COLUMNS[1..] {
            fields.push(Field::new(*name, DataType::Float64, false));
        }
        for column in table.data().columns() {
            fields.push(Field::new(column.name.as_str(), DataType::Float64, true));
        }

        Arc::new(Schema::new(fields))
    }

    fn table_to_batch<T: TabularData>(&self, table: &T, schema: Arc<Schema>) -> Result<RecordBatch> {
        let data = table.data();
        let stations = data.stations();
        let rows = stations.len();

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        if let Some(time) = table.time_label() {
            arrays.push(Arc::new(StringArray::from(vec![time; rows])));
        }

        let ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        let lons: Vec<f64> = stations.iter().map(|s| s.lon).collect();
        let lats: Vec<f64> = stations.iter().map(|s| s.lat).collect();
        let heights: Vec<f64> = stations.iter().map(|s| s.height).collect();
        arrays.push(Arc::new(StringArray::from(ids)));
        arrays.push(Arc::new(Float64Array::from(lons)));
        arrays.push(Arc::new(Float64Array::from(lats)));
        arrays.push(Arc::new(Float64Array::from(heights)));

        for column in data.columns() {
            arrays.push(Arc::new(Float64Array::from(column.values.clone())));
        }

        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};
        use std::fs::File;

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let total_columns = file_metadata.schema_descr().num_columns();
        let file_size = std::fs::metadata(path)?.len();

        let mut row_group_sizes = Vec::new();
        for i in 0..row_groups {
            let rg_metadata = metadata.row_group(i);
            row_group_sizes.push(rg_metadata.num_rows());
        }

        Ok(ParquetFileInfo {
            total_rows,
            total_columns,
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size,
            compression: self.compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub total_columns: usize,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Columns: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} KB\n\
            - Compression: {:?}",
            self.total_rows,
            self.total_columns,
            self.row_groups,
            self.file_size as f64 / 1024.0,
            self.compression,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FeatureColumn, FeatureTable, ObservationTime, Station, StationColumns, StationSet,
        StationSnapshot,
    };
    use tempfile::TempDir;

    fn table() -> FeatureTable {
        let stations = Arc::new(
            StationSet::new(vec![
                Station::new("58238", 118.9, 31.93, 35.0),
                Station::new("58321", 117.23, 31.87, 27.0),
                Station::new("58362", 121.45, 31.4, 5.5),
            ])
            .unwrap(),
        );
        let mut data = StationColumns::new(stations);
        data.push(FeatureColumn::new("0_T-0_SMS_ACC-r3", vec![Some(2.5), None, Some(0.0)]))
            .unwrap();
        data.push(FeatureColumn::new("0_T-3_SMS_ACC-r3", vec![None, None, Some(1.0)]))
            .unwrap();
        FeatureTable::new(ObservationTime::parse("2018080420").unwrap(), 3, data)
    }

    #[test]
    fn test_write_feature_table() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("T-3/T-3-2018080420.parquet");
        let writer = ParquetWriter::new();

        writer.write_table(&table(), &path)?;

        let info = writer.get_file_info(&path)?;
        assert_eq!(info.total_rows, 3);
        // time + 4 identity + 2 features
        assert_eq!(info.total_columns, 7);
        assert!(info.summary().contains("Total rows: 3"));
        Ok(())
    }

    #[test]
    fn test_snapshot_has_no_time_column() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("2018080420.parquet");
        let table = table();
        let snapshot = StationSnapshot::new(table.time, table.data.clone());

        let writer = ParquetWriter::new();
        writer.write_table(&snapshot, &path)?;
        assert_eq!(writer.get_file_info(&path)?.total_columns, 6);
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let compressions = ["snappy", "gzip", "lz4", "zstd", "none"];
        let dir = TempDir::new()?;

        for compression in &compressions {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let path = dir.path().join(format!("{}.parquet", compression));
            let result = writer.write_table(&table(), &path);
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }

        assert!(ParquetWriter::new().with_compression("brotli-9").is_err());
        Ok(())
    }
}
