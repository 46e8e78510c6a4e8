use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ProcessingError, Result};
use crate::models::forecast::ObservationTime;
use crate::models::station::{StationSet, IDENTITY_COLUMNS};

/// Column label of the base timestamp in feature tables.
pub const TIME_COLUMN: &str = "time";

/// One named feature, one value per master station. `None` is the missing marker.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn missing(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, vec![None; len])
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// A row of a source table before reconciliation, keyed by the id the source reports.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub station_id: String,
    pub values: Vec<Option<f64>>,
}

/// A station-keyed table as delivered by a source: any subset of stations, any order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StationTable {
    columns: Vec<String>,
    rows: Vec<StationRow>,
}

impl StationTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, station_id: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let station_id = station_id.into();
        if values.len() != self.columns.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "station {} has {} values for {} columns",
                station_id,
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(StationRow { station_id, values });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[StationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Feature columns aligned to the master station list.
///
/// Identity columns are never stored; they are read from the station set when the table is
/// written, so they can't drift from the master list.
#[derive(Debug, Clone)]
pub struct StationColumns {
    stations: Arc<StationSet>,
    columns: Vec<FeatureColumn>,
    names: HashSet<String>,
}

impl StationColumns {
    pub fn new(stations: Arc<StationSet>) -> Self {
        Self {
            stations,
            columns: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn push(&mut self, column: FeatureColumn) -> Result<()> {
        if column.values.len() != self.stations.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "column '{}' has {} values for {} stations",
                column.name,
                column.values.len(),
                self.stations.len()
            )));
        }
        if IDENTITY_COLUMNS.contains(&column.name.as_str()) || !self.names.insert(column.name.clone())
        {
            return Err(ProcessingError::Schema(format!(
                "column '{}' is already present",
                column.name
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn extend(&mut self, columns: impl IntoIterator<Item = FeatureColumn>) -> Result<()> {
        columns.into_iter().try_for_each(|c| self.push(c))
    }

    pub fn stations(&self) -> &Arc<StationSet> {
        &self.stations
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<FeatureColumn> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// All features of one observation timestamp, one row per master station.
#[derive(Debug, Clone)]
pub struct StationSnapshot {
    pub time: ObservationTime,
    pub data: StationColumns,
}

impl StationSnapshot {
    pub fn new(time: ObservationTime, data: StationColumns) -> Self {
        Self { time, data }
    }

    pub fn stations(&self) -> &Arc<StationSet> {
        self.data.stations()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.data.column(name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.data.column_names()
    }

    /// `[identity..., features...]`
    pub fn header(&self) -> Vec<String> {
        header_for(None, &self.data)
    }
}

/// Lag-window training table for one base timestamp.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub time: ObservationTime,
    pub gap: u32,
    pub data: StationColumns,
}

impl FeatureTable {
    pub fn new(time: ObservationTime, gap: u32, data: StationColumns) -> Self {
        Self { time, gap, data }
    }

    pub fn stations(&self) -> &Arc<StationSet> {
        self.data.stations()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.data.column(name)
    }

    /// `[time, identity..., features...]`
    pub fn header(&self) -> Vec<String> {
        header_for(Some(TIME_COLUMN), &self.data)
    }
}

fn header_for(lead: Option<&str>, data: &StationColumns) -> Vec<String> {
    lead.into_iter()
        .chain(IDENTITY_COLUMNS)
        .map(str::to_string)
        .chain(data.columns().iter().map(|c| c.name.clone()))
        .collect()
}

/// Shape shared by everything the writers persist.
pub trait TabularData {
    /// Value of the leading `time` column, if the table has one.
    fn time_label(&self) -> Option<String>;
    fn data(&self) -> &StationColumns;
    fn header(&self) -> Vec<String>;
}

impl TabularData for StationSnapshot {
    fn time_label(&self) -> Option<String> {
        None
    }

    fn data(&self) -> &StationColumns {
        &self.data
    }

    fn header(&self) -> Vec<String> {
        StationSnapshot::header(self)
    }
}

impl TabularData for FeatureTable {
    fn time_label(&self) -> Option<String> {
        Some(self.time.identifier())
    }

    fn data(&self) -> &StationColumns {
        &self.data
    }

    fn header(&self) -> Vec<String> {
        FeatureTable::header(self)
    }
}
