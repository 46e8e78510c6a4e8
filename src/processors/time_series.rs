use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::schema::lag_column;
use crate::models::{
    FeatureColumn, FeatureSchema, FeatureTable, ObservationTime, StationColumns, StationSet,
    StationSnapshot,
};
use crate::readers::snapshot_reader::SnapshotReader;
use crate::utils::constants::LAG_STEP_HOURS;
use crate::utils::filename::snapshot_path;

/// Lags of a window: `0, 3, ..., gap`.
pub fn window_lags(gap: u32) -> Result<Vec<u32>> {
    if gap == 0 || gap % LAG_STEP_HOURS != 0 {
        return Err(ProcessingError::Config(format!(
            "lag window {} is not a positive multiple of {} hours",
            gap, LAG_STEP_HOURS
        )));
    }
    Ok((0..=gap).step_by(LAG_STEP_HOURS as usize).collect())
}

/// Joins a base snapshot with its lagged predecessors into one flat training table.
pub struct TimeSeriesAssembler {
    stations: Arc<StationSet>,
    schema: Arc<FeatureSchema>,
    snapshot_dir: PathBuf,
    reader: SnapshotReader,
}

impl TimeSeriesAssembler {
    pub fn new(stations: Arc<StationSet>, schema: Arc<FeatureSchema>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            reader: SnapshotReader::new(stations.clone()),
            stations,
            schema,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// Snapshot file for each lag of the window, `T-0` first.
    pub fn snapshot_paths(&self, time: &ObservationTime, gap: u32) -> Result<Vec<(u32, PathBuf)>> {
        Ok(window_lags(gap)?
            .into_iter()
            .map(|lag| (lag, snapshot_path(&self.snapshot_dir, &time.minus_hours(lag as i64))))
            .collect())
    }

    /// Loads every snapshot of the window or none: one absent file fails the whole table.
    pub fn assemble(&self, time: &ObservationTime, gap: u32) -> Result<FeatureTable> {
        let paths = self.snapshot_paths(time, gap)?;
        if let Some((lag, path)) = paths.iter().find(|(_, path)| !path.is_file()) {
            return Err(ProcessingError::MissingLagSnapshot {
                path: path.clone(),
                lag: *lag,
            });
        }

        let snapshots = paths
            .iter()
            .map(|(lag, path)| self.reader.read(path, time.minus_hours(*lag as i64)))
            .collect::<Result<Vec<_>>>()?;
        self.assemble_snapshots(time, gap, &snapshots)
    }

    /// `snapshots` holds one snapshot per lag of the window, in lag order.
    pub fn assemble_snapshots(
        &self,
        time: &ObservationTime,
        gap: u32,
        snapshots: &[StationSnapshot],
    ) -> Result<FeatureTable> {
        let lags = window_lags(gap)?;
        if snapshots.len() != lags.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "T-{} window needs {} snapshots, got {}",
                gap,
                lags.len(),
                snapshots.len()
            )));
        }

        let mut data = StationColumns::new(self.stations.clone());
        for (lag, snapshot) in lags.iter().zip(snapshots) {
            let expected = time.minus_hours(*lag as i64);
            if snapshot.time != expected {
                return Err(ProcessingError::InvalidFormat(format!(
                    "T-{} snapshot is for {}, expected {}",
                    lag, snapshot.time, expected
                )));
            }
            if snapshot.stations().as_ref() != self.stations.as_ref() {
                return Err(ProcessingError::InvalidFormat(format!(
                    "T-{} snapshot does not follow the master station list",
                    lag
                )));
            }

            for column in snapshot.data.columns() {
                data.push(FeatureColumn::new(lag_column(&column.name, *lag), column.values.clone()))?;
            }
        }

        for column in self.accumulations(&data) {
            data.push(column)?;
        }

        debug!("assembled T-{} table for {}: {} columns", gap, time, data.len());
        Ok(FeatureTable::new(*time, gap, data))
    }

    /// 6-hour sums for each configured offset whose two 3-hour halves are in the window.
    fn accumulations(&self, data: &StationColumns) -> Vec<FeatureColumn> {
        let mut columns = Vec::new();
        for accumulation in &self.schema.accumulations {
            for &offset in &accumulation.offsets {
                let newer = data.column(&lag_column(&accumulation.source_column, offset));
                let older = data.column(&lag_column(&accumulation.source_column, offset + LAG_STEP_HOURS));
                let (Some(newer), Some(older)) = (newer, older) else {
                    continue;
                };

                let values = newer
                    .iter()
                    .zip(older)
                    .map(|(a, b)| Some((*a)? + (*b)?))
                    .collect();
                columns.push(FeatureColumn::new(lag_column(&accumulation.column, offset), values));
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccumulationFeature, Station};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const SOURCE: &str = "0_T-0_ECthin_TP-r3";

    fn stations() -> Arc<StationSet> {
        Arc::new(
            StationSet::new(vec![
                Station::new("58238", 118.9, 31.93, 35.0),
                Station::new("58321", 117.23, 31.87, 27.0),
            ])
            .unwrap(),
        )
    }

    fn schema() -> Arc<FeatureSchema> {
        let mut schema = FeatureSchema::default();
        schema.accumulations = vec![AccumulationFeature::new(SOURCE, "0_T-0_ECthin_TP-r6")];
        Arc::new(schema)
    }

    fn base() -> ObservationTime {
        ObservationTime::parse("2018080420").unwrap()
    }

    /// Snapshot whose rain equals its lag, with the second station missing at T-3.
    fn snapshot(lag: u32) -> StationSnapshot {
        let mut data = StationColumns::new(stations());
        let second = if lag == 3 { None } else { Some(lag as f64 + 0.5) };
        data.push(FeatureColumn::new(SOURCE, vec![Some(lag as f64), second]))
            .unwrap();
        data.push(FeatureColumn::new("3_T-0_ECthin_2T", vec![Some(300.0), None]))
            .unwrap();
        StationSnapshot::new(base().minus_hours(lag as i64), data)
    }

    fn write_snapshot(dir: &std::path::Path, lag: u32) {
        let time = base().minus_hours(lag as i64);
        let second = if lag == 3 { String::new() } else { format!("{}", lag as f64 + 0.5) };
        let text = format!(
            "station_num,lon,lat,height,{},3_T-0_ECthin_2T\n58238,118.9,31.93,35.0,{},300\n58321,117.23,31.87,27.0,{},\n",
            SOURCE, lag, second
        );
        fs::write(snapshot_path(dir, &time), text).unwrap();
    }

    #[test]
    fn test_window_lags() {
        assert_eq!(window_lags(3).unwrap(), vec![0, 3]);
        assert_eq!(window_lags(12).unwrap(), vec![0, 3, 6, 9, 12]);
        assert!(window_lags(0).is_err());
        assert!(window_lags(4).is_err());
    }

    #[test]
    fn test_column_order_and_renaming() {
        let assembler = TimeSeriesAssembler::new(stations(), schema(), "unused");
        let snapshots: Vec<_> = [0, 3, 6].into_iter().map(snapshot).collect();
        let table = assembler.assemble_snapshots(&base(), 6, &snapshots).unwrap();

        assert_eq!(
            table.header(),
            vec![
                "time",
                "station_num",
                "lon",
                "lat",
                "height",
                "0_T-0_ECthin_TP-r3",
                "3_T-0_ECthin_2T",
                "0_T-3_ECthin_TP-r3",
                "3_T-3_ECthin_2T",
                "0_T-6_ECthin_TP-r3",
                "3_T-6_ECthin_2T",
                "0_T-0_ECthin_TP-r6",
            ]
        );
        // T-0 + T-3, missing when either half is
        assert_eq!(table.column("0_T-0_ECthin_TP-r6").unwrap(), &[Some(3.0), None]);
    }

    #[test]
    fn test_second_accumulation_needs_lag_nine() {
        let assembler = TimeSeriesAssembler::new(stations(), schema(), "unused");

        let snapshots: Vec<_> = [0, 3].into_iter().map(snapshot).collect();
        let table = assembler.assemble_snapshots(&base(), 3, &snapshots).unwrap();
        assert!(table.column("0_T-0_ECthin_TP-r6").is_some());
        assert!(table.column("0_T-6_ECthin_TP-r6").is_none());

        let snapshots: Vec<_> = [0, 3, 6, 9, 12].into_iter().map(snapshot).collect();
        let table = assembler.assemble_snapshots(&base(), 12, &snapshots).unwrap();
        assert_eq!(table.column("0_T-6_ECthin_TP-r6").unwrap(), &[Some(15.0), Some(16.0)]);
        assert!(table.column("0_T-9_ECthin_TP-r6").is_none());
    }

    #[test]
    fn test_snapshots_must_match_window() {
        let assembler = TimeSeriesAssembler::new(stations(), schema(), "unused");
        let snapshots: Vec<_> = [0, 6].into_iter().map(snapshot).collect();
        assert!(assembler.assemble_snapshots(&base(), 3, &snapshots).is_err());
        assert!(assembler.assemble_snapshots(&base(), 6, &snapshots).is_err());
    }

    #[test]
    fn test_assemble_from_disk() -> Result<()> {
        let dir = TempDir::new()?;
        for lag in [0, 3, 6, 9] {
            write_snapshot(dir.path(), lag);
        }
        let assembler = TimeSeriesAssembler::new(stations(), schema(), dir.path());

        let table = assembler.assemble(&base(), 9)?;
        assert_eq!(table.gap, 9);
        assert_eq!(table.column("0_T-9_ECthin_TP-r3").unwrap(), &[Some(9.0), Some(9.5)]);
        assert_eq!(table.column("0_T-6_ECthin_TP-r6").unwrap(), &[Some(15.0), Some(16.0)]);
        Ok(())
    }

    #[test]
    fn test_missing_lag_fails_whole_window() -> Result<()> {
        let dir = TempDir::new()?;
        for lag in [0, 3, 6, 9] {
            write_snapshot(dir.path(), lag);
        }
        let assembler = TimeSeriesAssembler::new(stations(), schema(), dir.path());

        match assembler.assemble(&base(), 12) {
            Err(ProcessingError::MissingLagSnapshot { path, lag }) => {
                assert_eq!(lag, 12);
                assert!(path.ends_with("2018080408.csv"));
            }
            other => panic!("expected a missing T-12 snapshot, got {:?}", other.map(|t| t.gap)),
        }
        Ok(())
    }
}
