use std::path::Path;
use std::sync::Arc;

use crate::error::{ProcessingError, Result};
use crate::models::table::TIME_COLUMN;
use crate::models::{ObservationTime, StationSet, StationSnapshot, StationTable, IDENTITY_COLUMNS};
use crate::processors::reconciler::StationReconciler;

/// Loads composed T-0 snapshots back for lag assembly.
pub struct SnapshotReader {
    reconciler: StationReconciler,
}

impl SnapshotReader {
    pub fn new(stations: Arc<StationSet>) -> Self {
        Self {
            reconciler: StationReconciler::new(stations),
        }
    }

    pub fn read(&self, path: &Path, time: ObservationTime) -> Result<StationSnapshot> {
        let file = std::fs::File::open(path).map_err(|e| ProcessingError::from(e).in_input(path))?;
        self.read_from(file, time).map_err(|e| e.in_input(path))
    }

    pub fn read_from<R: std::io::Read>(&self, reader: R, time: ObservationTime) -> Result<StationSnapshot> {
        let mut csv_reader = csv::ReaderBuilder::new().from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let id_column = headers
            .iter()
            .position(|h| h == IDENTITY_COLUMNS[0])
            .ok_or_else(|| {
                ProcessingError::InvalidFormat(format!("no '{}' column", IDENTITY_COLUMNS[0]))
            })?;
        let features: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| *h != TIME_COLUMN && !IDENTITY_COLUMNS.contains(h))
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut table = StationTable::new(features.iter().map(|(_, name)| name.clone()).collect());
        for row in csv_reader.records() {
            let row = row?;
            let id = row.get(id_column).unwrap_or("").trim();
            let values = features
                .iter()
                .map(|(i, name)| parse_cell(row.get(*i).unwrap_or(""), name, id))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(id, values)?;
        }

        let (data, _) = self.reconciler.reconcile(&table)?;
        Ok(StationSnapshot::new(time, data))
    }
}

fn parse_cell(raw: &str, column: &str, station: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| {
        ProcessingError::InvalidFormat(format!(
            "station {} column '{}': '{}' is not a number",
            station, column, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Station;
    use pretty_assertions::assert_eq;

    fn stations() -> Arc<StationSet> {
        Arc::new(
            StationSet::new(vec![
                Station::new("58238", 118.9, 31.93, 35.0),
                Station::new("58321", 117.23, 31.87, 27.0),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_read_snapshot_in_master_order() {
        let text = "station_num,lon,lat,height,0_T-0_SMS_ACC-r3,3_T-0_ECthin_2T\n\
                    58321,117.23,31.87,27.0,,301.5\n\
                    58238,118.9,31.93,35.0,2.5,NaN\n";
        let time = ObservationTime::parse("2018080420").unwrap();
        let snapshot = SnapshotReader::new(stations())
            .read_from(text.as_bytes(), time)
            .unwrap();

        assert_eq!(snapshot.column_names(), vec!["0_T-0_SMS_ACC-r3", "3_T-0_ECthin_2T"]);
        assert_eq!(snapshot.column("0_T-0_SMS_ACC-r3").unwrap(), &[Some(2.5), None]);
        assert_eq!(snapshot.column("3_T-0_ECthin_2T").unwrap(), &[None, Some(301.5)]);
    }

    #[test]
    fn test_corrupt_cell_rejected() {
        let text = "station_num,lon,lat,height,a_T-0\n58238,118.9,31.93,35.0,x\n";
        let time = ObservationTime::parse("2018080420").unwrap();
        let result = SnapshotReader::new(stations()).read_from(text.as_bytes(), time);
        assert!(matches!(result, Err(ProcessingError::InvalidFormat(_))));
    }

    #[test]
    fn test_ragged_file_names_the_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("2018080417.csv");
        std::fs::write(&path, "station_num,lon,lat,height,a_T-0\n58238,118.9,31.93\n").unwrap();

        let time = ObservationTime::parse("2018080417").unwrap();
        match SnapshotReader::new(stations()).read(&path, time) {
            Err(e @ ProcessingError::InvalidFormat(_)) => {
                assert!(e.is_recoverable());
                assert!(e.to_string().contains("2018080417.csv"));
            }
            other => panic!("expected a format error, got {:?}", other.map(|s| s.time)),
        }
    }
}
