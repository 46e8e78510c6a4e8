use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{SourceKind, StationTable};
use crate::utils::constants::MISSING_SENTINEL_THRESHOLD;

/// Measured quantities of an hourly station observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationField {
    Temperature,
    MaxTemperature,
    MinTemperature,
    DewPoint,
    RelativeHumidity,
    Precipitation,
    WindMeanDirection,
    WindMeanSpeed,
    WindMaxDirection,
    WindMaxSpeed,
}

impl ObservationField {
    pub const ALL: [ObservationField; 10] = [
        ObservationField::Temperature,
        ObservationField::MaxTemperature,
        ObservationField::MinTemperature,
        ObservationField::DewPoint,
        ObservationField::RelativeHumidity,
        ObservationField::Precipitation,
        ObservationField::WindMeanDirection,
        ObservationField::WindMeanSpeed,
        ObservationField::WindMaxDirection,
        ObservationField::WindMaxSpeed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ObservationField::Temperature => "temperature",
            ObservationField::MaxTemperature => "max_temperature",
            ObservationField::MinTemperature => "min_temperature",
            ObservationField::DewPoint => "dew_point",
            ObservationField::RelativeHumidity => "relative_humidity",
            ObservationField::Precipitation => "precipitation",
            ObservationField::WindMeanDirection => "wind_mean_direction",
            ObservationField::WindMeanSpeed => "wind_mean_speed",
            ObservationField::WindMaxDirection => "wind_max_direction",
            ObservationField::WindMaxSpeed => "wind_max_speed",
        }
    }

    /// Header names the field is known by, Chinese export first.
    fn aliases(self) -> &'static [&'static str] {
        match self {
            ObservationField::Temperature => &["气温", "temperature", "t"],
            ObservationField::MaxTemperature => &["最高气温", "max_temperature", "tmax"],
            ObservationField::MinTemperature => &["最低气温", "min_temperature", "tmin"],
            ObservationField::DewPoint => &["露点温度", "dew_point", "td"],
            ObservationField::RelativeHumidity => &["相对湿度", "relative_humidity", "rh"],
            ObservationField::Precipitation => &["小时降水量", "precipitation", "r1"],
            ObservationField::WindMeanDirection => {
                &["C2分钟风向", "2分钟风向", "wind_mean_direction"]
            }
            ObservationField::WindMeanSpeed => {
                &["C2分钟平均风速", "2分钟平均风速", "wind_mean_speed"]
            }
            ObservationField::WindMaxDirection => &["最大风速的风向", "wind_max_direction"],
            ObservationField::WindMaxSpeed => &["最大风速", "wind_max_speed"],
        }
    }
}

const STATION_ALIASES: [&str; 4] = ["站号", "station_num", "station_id", "station"];

/// One station's hourly observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub station_id: String,
    values: [Option<f64>; ObservationField::ALL.len()],
}

impl ObservationRecord {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            values: [None; ObservationField::ALL.len()],
        }
    }

    pub fn with(mut self, field: ObservationField, value: Option<f64>) -> Self {
        self.values[field.index()] = value;
        self
    }

    pub fn get(&self, field: ObservationField) -> Option<f64> {
        self.values[field.index()]
    }
}

/// Station table of the requested fields, one row per record.
pub fn observation_table(
    records: &[ObservationRecord],
    fields: &[(ObservationField, String)],
) -> Result<StationTable> {
    let mut table = StationTable::new(fields.iter().map(|(_, name)| name.clone()).collect());
    for record in records {
        let values = fields.iter().map(|(field, _)| record.get(*field)).collect();
        table.push_row(record.station_id.clone(), values)?;
    }
    Ok(table)
}

/// Reads hourly station observation files (`YYYYMMDDHH.txt`, comma separated, header row).
///
/// Columns are resolved by header name once per file. Lines that don't parse are skipped
/// and logged; empty fields and sentinel values are missing.
pub struct ObservationReader {
    sentinel_threshold: f64,
}

impl ObservationReader {
    pub fn new() -> Self {
        Self {
            sentinel_threshold: MISSING_SENTINEL_THRESHOLD,
        }
    }

    pub fn with_sentinel_threshold(mut self, threshold: f64) -> Self {
        self.sentinel_threshold = threshold;
        self
    }

    pub fn read(&self, path: &Path) -> Result<Vec<ObservationRecord>> {
        if !path.is_file() {
            return Err(ProcessingError::MissingSourceFile {
                path: path.to_path_buf(),
                system: SourceKind::Observation,
            });
        }
        let bytes = std::fs::read(path).map_err(|e| ProcessingError::from(e).in_input(path))?;
        let text = decode_text(&bytes, path);
        self.parse(&text).map_err(|e| e.in_input(path))
    }

    pub fn parse(&self, text: &str) -> Result<Vec<ObservationRecord>> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = csv_reader.headers()?.clone();
        let position = |aliases: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim_start_matches('\u{feff}');
                aliases.iter().any(|a| a.eq_ignore_ascii_case(h))
            })
        };

        let station_column = position(&STATION_ALIASES).ok_or_else(|| {
            ProcessingError::InvalidFormat("observation file has no station id column".to_string())
        })?;
        let columns: Vec<(ObservationField, usize)> = ObservationField::ALL
            .iter()
            .filter_map(|field| {
                let found = position(field.aliases());
                if found.is_none() {
                    debug!("observation column for {:?} not found", field);
                }
                found.map(|column| (*field, column))
            })
            .collect();

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line, row) in csv_reader.records().enumerate() {
            // header is line 1
            let line = line + 2;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("skipping observation line {}: {}", line, e);
                    skipped += 1;
                    continue;
                }
            };

            match self.parse_row(&row, station_column, &columns) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(reason) => {
                    warn!("skipping observation line {}: {}", line, reason);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!("{} malformed observation lines skipped", skipped);
        }
        Ok(records)
    }

    fn parse_row(
        &self,
        row: &csv::StringRecord,
        station_column: usize,
        columns: &[(ObservationField, usize)],
    ) -> std::result::Result<Option<ObservationRecord>, String> {
        let station_id = row.get(station_column).unwrap_or("").trim();
        if station_id.is_empty() {
            return Ok(None);
        }

        let mut record = ObservationRecord::new(station_id);
        for &(field, column) in columns {
            let raw = row.get(column).unwrap_or("");
            if raw.is_empty() {
                continue;
            }
            let value: f64 = raw
                .parse()
                .map_err(|_| format!("{:?} value '{}' is not a number", field, raw))?;
            if value.is_finite() && value.abs() < self.sentinel_threshold {
                record.values[field.index()] = Some(value);
            }
        }
        Ok(Some(record))
    }
}

impl Default for ObservationReader {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 if it is, GBK otherwise.
pub(crate) fn decode_text<'a>(bytes: &'a [u8], path: &Path) -> Cow<'a, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text.trim_start_matches('\u{feff}')),
        Err(_) => {
            let (text, _, had_errors) = encoding_rs::GBK.decode(bytes);
            if had_errors {
                warn!("{} is neither UTF-8 nor clean GBK", path.display());
            }
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "站号,时间,气温,最高气温,最低气温,露点温度,相对湿度,小时降水量,C2分钟风向,C2分钟平均风速,最大风速的风向,最大风速";

    #[test]
    fn test_parse_chinese_headers() {
        let text = format!(
            "{}\n58238,2018080420,28.5,29.1,27.9,24.0,77,1.2,90,2.1,180,5.5\n58321,2018080420,,,,,,0,,,,\n",
            HEADER
        );
        let records = ObservationReader::new().parse(&text).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].station_id, "58238");
        assert_eq!(records[0].get(ObservationField::Precipitation), Some(1.2));
        assert_eq!(records[0].get(ObservationField::WindMaxDirection), Some(180.0));
        assert_eq!(records[1].get(ObservationField::Temperature), None);
        assert_eq!(records[1].get(ObservationField::Precipitation), Some(0.0));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let text = format!(
            "{}\n58238,2018080420,abc,,,,,1.0,,,,\n58321,2018080420,25,,,,,999999,,,,\n,2018080420,1,,,,,,,,,\n",
            HEADER
        );
        let records = ObservationReader::new().parse(&text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].station_id, "58321");
        // sentinel is missing, not a value
        assert_eq!(records[0].get(ObservationField::Precipitation), None);
    }

    #[test]
    fn test_english_headers_and_missing_columns() {
        let text = "station_num,precipitation\n58238,3.5\n";
        let records = ObservationReader::new().parse(text).unwrap();
        assert_eq!(records[0].get(ObservationField::Precipitation), Some(3.5));
        assert_eq!(records[0].get(ObservationField::DewPoint), None);

        assert!(ObservationReader::new().parse("a,b\n1,2\n").is_err());
    }

    #[test]
    fn test_gbk_file_decoded() -> Result<()> {
        let text = format!("{}\n58238,2018080420,28.5,,,,,0.4,,,,\n", HEADER);
        let (encoded, _, _) = encoding_rs::GBK.encode(&text);

        let mut file = NamedTempFile::new()?;
        file.write_all(&encoded)?;
        let records = ObservationReader::new().read(file.path())?;
        assert_eq!(records[0].get(ObservationField::Precipitation), Some(0.4));
        Ok(())
    }

    #[test]
    fn test_missing_file_reported_as_source() {
        let result = ObservationReader::new().read(Path::new("/nonexistent/2018080420.txt"));
        assert!(matches!(
            result,
            Err(ProcessingError::MissingSourceFile {
                system: SourceKind::Observation,
                ..
            })
        ));
    }

    #[test]
    fn test_observation_table_columns() {
        let records = vec![
            ObservationRecord::new("58238").with(ObservationField::Precipitation, Some(1.0)),
            ObservationRecord::new("58321"),
        ];
        let fields = vec![(ObservationField::Precipitation, "r1".to_string())];
        let table = observation_table(&records, &fields).unwrap();
        assert_eq!(table.columns(), &["r1".to_string()]);
        assert_eq!(table.rows()[0].values, vec![Some(1.0)]);
        assert_eq!(table.rows()[1].values, vec![None]);
    }
}
