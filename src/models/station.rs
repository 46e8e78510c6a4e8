use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::error::{ProcessingError, Result};

/// Identity columns shared by every station-keyed table, in output order.
pub const IDENTITY_COLUMNS: [&str; 4] = ["station_num", "lon", "lat", "height"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Station {
    #[validate(length(min = 1))]
    #[serde(rename = "station_num")]
    pub id: String,

    #[validate(range(min = -180.0, max = 360.0))]
    pub lon: f64,

    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,

    pub height: f64,
}

impl Station {
    pub fn new(id: impl Into<String>, lon: f64, lat: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            lon,
            lat,
            height,
        }
    }

    pub fn is_within(&self, bbox: &crate::models::BoundingBox) -> bool {
        bbox.contains(self.lon, self.lat)
    }
}

/// The master station list. Row order of every derived table follows this order.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSet {
    stations: Vec<Station>,
    index: HashMap<String, usize>,
}

impl StationSet {
    pub fn new(stations: Vec<Station>) -> Result<Self> {
        let mut index = HashMap::with_capacity(stations.len());

        for (position, station) in stations.iter().enumerate() {
            station.validate()?;
            if index.insert(station.id.clone(), position).is_some() {
                return Err(ProcessingError::InvalidFormat(format!(
                    "Duplicate station id in master list: {}",
                    station.id
                )));
            }
        }

        Ok(Self { stations, index })
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Station> {
        self.stations.iter()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Station> {
        self.position(id).map(|i| &self.stations[i])
    }

    pub fn lons(&self) -> Vec<f64> {
        self.stations.iter().map(|s| s.lon).collect()
    }

    pub fn lats(&self) -> Vec<f64> {
        self.stations.iter().map(|s| s.lat).collect()
    }
}

impl<'a> IntoIterator for &'a StationSet {
    type Item = &'a Station;
    type IntoIter = std::slice::Iter<'a, Station>;

    fn into_iter(self) -> Self::IntoIter {
        self.stations.iter()
    }
}
