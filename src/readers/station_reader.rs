use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{BoundingBox, Station, StationSet};

/// Reads the master station list: a CSV with `station_num, lon, lat, height` columns.
pub struct StationReader {
    region: Option<BoundingBox>,
}

impl StationReader {
    pub fn new() -> Self {
        Self { region: None }
    }

    /// Keep only stations inside `region`.
    pub fn with_region(mut self, region: Option<BoundingBox>) -> Self {
        self.region = region;
        self
    }

    pub fn read_stations(&self, path: &Path) -> Result<StationSet> {
        let file = File::open(path).map_err(|e| {
            ProcessingError::Config(format!(
                "cannot open station list {}: {}",
                path.display(),
                e
            ))
        })?;
        self.read_from(file)
    }

    pub fn read_from<R: std::io::Read>(&self, reader: R) -> Result<StationSet> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut stations = Vec::new();
        let mut outside = 0usize;
        for record in csv_reader.deserialize::<Station>() {
            let station = record?;
            match &self.region {
                Some(region) if !station.is_within(region) => outside += 1,
                _ => stations.push(station),
            }
        }

        if stations.is_empty() {
            return Err(ProcessingError::InvalidFormat(
                "station list contains no usable stations".to_string(),
            ));
        }
        if outside > 0 {
            warn!("{} stations outside the configured region were skipped", outside);
        }
        info!("loaded {} master stations", stations.len());

        StationSet::new(stations)
    }
}

impl Default for StationReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const STATIONS: &str = "station_num,lon,lat,height\n\
                            58238,118.9,31.93,35.0\n\
                            58321, 117.23 ,31.87,27.0\n\
                            52889,103.88,36.05,1517.2\n";

    #[test]
    fn test_read_stations_file() -> Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "{}", STATIONS)?;

        let stations = StationReader::new().read_stations(temp_file.path())?;
        assert_eq!(stations.len(), 3);
        assert_eq!(stations.stations()[1].id, "58321");
        assert!((stations.stations()[1].lon - 117.23).abs() < 1e-12);
        assert_eq!(stations.position("52889"), Some(2));
        Ok(())
    }

    #[test]
    fn test_region_filter() -> Result<()> {
        let stations = StationReader::new()
            .with_region(Some(BoundingBox::default()))
            .read_from(STATIONS.as_bytes())?;
        // 103.88E is west of the default region
        assert_eq!(stations.len(), 2);
        assert!(!stations.contains("52889"));
        Ok(())
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let data = "station_num,lon,lat,height\n58238,118.9,31.93,35\n58238,118.9,31.93,35\n";
        assert!(StationReader::new().read_from(data.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = StationReader::new().read_stations(Path::new("/nonexistent/stations.csv"));
        assert!(matches!(result, Err(ProcessingError::Config(_))));
    }
}
