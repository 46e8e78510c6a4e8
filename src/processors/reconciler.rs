use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::{ProcessingError, Result};
use crate::models::{FeatureColumn, StationColumns, StationSet, StationTable};

/// Bookkeeping from one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Source stations not in the master list.
    pub dropped: Vec<String>,
    /// Master stations the source did not report.
    pub missing: Vec<String>,
    /// Source stations reported more than once (first row kept).
    pub duplicates: Vec<String>,
}

impl ReconcileReport {
    pub fn is_exact(&self) -> bool {
        self.dropped.is_empty() && self.missing.is_empty() && self.duplicates.is_empty()
    }
}

/// Pads a partial station table out to the master station list.
///
/// The result has one row per master station in master order; identity columns always
/// come from the master list, never from the source.
#[derive(Debug, Clone)]
pub struct StationReconciler {
    stations: Arc<StationSet>,
    strict: bool,
}

impl StationReconciler {
    pub fn new(stations: Arc<StationSet>) -> Self {
        Self {
            stations,
            strict: false,
        }
    }

    /// Unknown stations become a `StationMismatch` error instead of a warning.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn stations(&self) -> &Arc<StationSet> {
        &self.stations
    }

    pub fn reconcile(&self, partial: &StationTable) -> Result<(StationColumns, ReconcileReport)> {
        let master = &self.stations;
        let mut report = ReconcileReport::default();

        let mut slots: Vec<Option<usize>> = vec![None; master.len()];
        for (row_index, row) in partial.rows().iter().enumerate() {
            match master.position(&row.station_id) {
                Some(position) if slots[position].is_some() => {
                    report.duplicates.push(row.station_id.clone());
                }
                Some(position) => slots[position] = Some(row_index),
                None if self.strict => {
                    return Err(ProcessingError::StationMismatch {
                        station_id: row.station_id.clone(),
                    });
                }
                None => report.dropped.push(row.station_id.clone()),
            }
        }

        report.missing = master
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(station, _)| station.id.clone())
            .collect();

        if !report.dropped.is_empty() {
            warn!(
                "dropped {} stations not in the master list: {}",
                report.dropped.len(),
                preview(&report.dropped)
            );
        }
        if !report.duplicates.is_empty() {
            warn!(
                "ignored {} repeated station rows: {}",
                report.duplicates.len(),
                preview(&report.duplicates)
            );
        }

        let mut data = StationColumns::new(master.clone());
        for (column_index, name) in partial.columns().iter().enumerate() {
            let values = slots
                .iter()
                .map(|slot| slot.and_then(|row| partial.rows()[row].values[column_index]))
                .collect();
            data.push(FeatureColumn::new(name.clone(), values))?;
        }

        Ok((data, report))
    }

    /// Place full-length columns that are already in master order (interpolated grids).
    pub fn adopt(&self, columns: Vec<FeatureColumn>) -> Result<StationColumns> {
        let mut data = StationColumns::new(self.stations.clone());
        data.extend(columns)?;
        Ok(data)
    }
}

fn preview(ids: &[String]) -> String {
    const SHOWN: usize = 5;
    if ids.len() <= SHOWN {
        ids.join(", ")
    } else {
        format!("{}, ... (+{})", ids[..SHOWN].join(", "), ids.len() - SHOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Station;
    use pretty_assertions::assert_eq;

    fn master() -> Arc<StationSet> {
        Arc::new(
            StationSet::new(vec![
                Station::new("58238", 118.90, 31.93, 35.0),
                Station::new("58321", 117.23, 31.87, 27.0),
                Station::new("58362", 121.45, 31.40, 5.5),
            ])
            .unwrap(),
        )
    }

    fn partial() -> StationTable {
        let mut table = StationTable::new(vec!["a".to_string(), "b".to_string()]);
        // source order differs from the master list
        table
            .push_row("58362", vec![Some(3.0), None])
            .unwrap();
        table
            .push_row("99999", vec![Some(9.0), Some(9.0)])
            .unwrap();
        table
            .push_row("58238", vec![Some(1.0), Some(1.5)])
            .unwrap();
        table
    }

    #[test]
    fn test_output_follows_master_order() {
        let reconciler = StationReconciler::new(master());
        let (data, report) = reconciler.reconcile(&partial()).unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data.column("a").unwrap(), &[Some(1.0), None, Some(3.0)]);
        assert_eq!(data.column("b").unwrap(), &[Some(1.5), None, None]);
        assert_eq!(data.stations().stations()[0].lon, 118.90);

        assert_eq!(report.dropped, vec!["99999".to_string()]);
        assert_eq!(report.missing, vec!["58321".to_string()]);
        assert!(!report.is_exact());
    }

    #[test]
    fn test_strict_rejects_unknown_station() {
        let reconciler = StationReconciler::new(master()).with_strict(true);
        let result = reconciler.reconcile(&partial());
        assert!(matches!(
            result,
            Err(ProcessingError::StationMismatch { station_id }) if station_id == "99999"
        ));
    }

    #[test]
    fn test_duplicates_keep_first_row() {
        let mut table = StationTable::new(vec!["a".to_string()]);
        table
            .push_row("58321", vec![Some(1.0)])
            .unwrap();
        table
            .push_row("58321", vec![Some(2.0)])
            .unwrap();

        let (data, report) = StationReconciler::new(master()).reconcile(&table).unwrap();
        assert_eq!(data.column("a").unwrap(), &[None, Some(1.0), None]);
        assert_eq!(report.duplicates, vec!["58321".to_string()]);
    }

    #[test]
    fn test_empty_source_is_all_missing() {
        let table = StationTable::new(vec!["a".to_string()]);
        let (data, report) = StationReconciler::new(master()).reconcile(&table).unwrap();
        assert_eq!(data.column("a").unwrap(), &[None, None, None]);
        assert_eq!(report.missing.len(), 3);
    }

    #[test]
    fn test_preview_truncates() {
        let ids: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        assert_eq!(preview(&ids), "0, 1, 2, 3, 4, ... (+3)");
    }
}
