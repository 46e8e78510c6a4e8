use chrono::{NaiveDate, NaiveDateTime};
use memmap2::Mmap;
use ndarray::Array2;
use std::fs::File;
use std::path::Path;

use crate::error::{ProcessingError, Result};
use crate::models::Grid;
use crate::readers::observation_reader::decode_text;
use crate::utils::constants::MISSING_SENTINEL_THRESHOLD;

/// Numbers between the `diamond 4 <description>` line and the values.
const HEADER_NUMBERS: usize = 19;

/// Header of a MICAPS diamond-4 (regular lon/lat grid) file.
#[derive(Debug, Clone, PartialEq)]
pub struct MicapsHeader {
    pub description: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub lead_hours: u32,
    pub level: f64,
    pub dlon: f64,
    pub dlat: f64,
    pub lon_start: f64,
    pub lon_end: f64,
    pub lat_start: f64,
    pub lat_end: f64,
    pub nlon: usize,
    pub nlat: usize,
}

impl MicapsHeader {
    /// Model cycle time; two-digit years are 20xx.
    pub fn cycle(&self) -> Option<NaiveDateTime> {
        let year = if self.year < 100 { 2000 + self.year } else { self.year };
        NaiveDate::from_ymd_opt(year, self.month, self.day)?.and_hms_opt(self.hour, 0, 0)
    }

    /// Step between consecutive nodes along an axis, taken from the extent when possible
    /// so the sign always follows the data order.
    fn step(start: f64, end: f64, count: usize, declared: f64) -> f64 {
        if count > 1 && end != start {
            (end - start) / (count - 1) as f64
        } else {
            declared
        }
    }
}

/// Decoder for MICAPS diamond-4 grid files as written for the thinned EC products.
pub struct MicapsReader {
    use_mmap: bool,
}

impl MicapsReader {
    pub fn new() -> Self {
        Self { use_mmap: false }
    }

    /// Map the file into memory instead of reading it; worthwhile for large global grids.
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn read(&self, path: &Path) -> Result<(MicapsHeader, Grid)> {
        self.read_unattributed(path).map_err(|e| e.in_input(path))
    }

    fn read_unattributed(&self, path: &Path) -> Result<(MicapsHeader, Grid)> {
        if self.use_mmap {
            let file = File::open(path)?;
            let mmap = unsafe { Mmap::map(&file)? };
            self.parse(&decode_text(&mmap, path))
        } else {
            let bytes = std::fs::read(path)?;
            self.parse(&decode_text(&bytes, path))
        }
    }

    pub fn read_grid(&self, path: &Path) -> Result<Grid> {
        self.read(path).map(|(_, grid)| grid)
    }

    pub fn parse(&self, text: &str) -> Result<(MicapsHeader, Grid)> {
        let mut lines = text.lines().skip_while(|l| l.trim().is_empty());
        let first = lines
            .next()
            .ok_or_else(|| ProcessingError::InvalidFormat("empty MICAPS file".to_string()))?;

        let mut first_tokens = first.split_whitespace();
        let (magic, kind) = (first_tokens.next(), first_tokens.next());
        if !matches!(magic, Some(m) if m.eq_ignore_ascii_case("diamond")) || kind != Some("4") {
            return Err(ProcessingError::InvalidFormat(format!(
                "not a diamond 4 file (starts with '{}')",
                first.chars().take(20).collect::<String>()
            )));
        }

        // The description is normally one token; anything numeric after it already
        // belongs to the header block.
        let rest: Vec<&str> = first_tokens.collect();
        let (description, mut numbers) = match rest.split_first() {
            Some((desc, tail)) if tail.iter().all(|t| t.parse::<f64>().is_ok()) => {
                (desc.to_string(), tail.iter().map(|t| parse_number(t)).collect::<Result<Vec<_>>>()?)
            }
            _ => (rest.join(" "), Vec::new()),
        };

        for line in lines {
            for token in line.split_whitespace() {
                numbers.push(parse_number(token)?);
            }
        }

        if numbers.len() < HEADER_NUMBERS {
            return Err(ProcessingError::InvalidFormat(format!(
                "header has {} of {} numbers",
                numbers.len(),
                HEADER_NUMBERS
            )));
        }

        let as_count = |v: f64, what: &str| -> Result<usize> {
            if v >= 1.0 && v.fract() == 0.0 {
                Ok(v as usize)
            } else {
                Err(ProcessingError::InvalidFormat(format!("invalid {} '{}'", what, v)))
            }
        };

        let header = MicapsHeader {
            description,
            year: numbers[0] as i32,
            month: numbers[1] as u32,
            day: numbers[2] as u32,
            hour: numbers[3] as u32,
            lead_hours: numbers[4] as u32,
            level: numbers[5],
            dlon: numbers[6],
            dlat: numbers[7],
            lon_start: numbers[8],
            lon_end: numbers[9],
            lat_start: numbers[10],
            lat_end: numbers[11],
            nlon: as_count(numbers[12], "column count")?,
            nlat: as_count(numbers[13], "row count")?,
        };

        let values = &numbers[HEADER_NUMBERS..];
        let expected = header.nlon * header.nlat;
        if values.len() < expected {
            return Err(ProcessingError::InvalidFormat(format!(
                "expected {} values ({} x {}), found {}",
                expected,
                header.nlat,
                header.nlon,
                values.len()
            )));
        }

        let grid = self.build_grid(&header, &values[..expected])?;
        Ok((header, grid))
    }

    fn build_grid(&self, header: &MicapsHeader, values: &[f64]) -> Result<Grid> {
        let (rows, cols) = (header.nlat, header.nlon);
        let lon_step = MicapsHeader::step(header.lon_start, header.lon_end, cols, header.dlon);
        let lat_step = MicapsHeader::step(header.lat_start, header.lat_end, rows, header.dlat);

        let lon = Array2::from_shape_fn((rows, cols), |(_, j)| header.lon_start + j as f64 * lon_step);
        let lat = Array2::from_shape_fn((rows, cols), |(i, _)| header.lat_start + i as f64 * lat_step);
        let data = Array2::from_shape_fn((rows, cols), |(i, j)| {
            let v = values[i * cols + j];
            if v.abs() >= MISSING_SENTINEL_THRESHOLD {
                f64::NAN
            } else {
                v
            }
        });

        Grid::new(lon, lat, data)
    }
}

impl Default for MicapsReader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(token: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| ProcessingError::InvalidFormat(format!("'{}' is not a number", token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// 3 x 4 grid, rows written south to north.
    const SOUTH_FIRST: &str = "diamond 4 18年08月04日08时003时效_降水\n\
        18 08 04 08 3 0\n\
        0.5 0.5 110.0 111.5 30.0 31.0 4 3 1.0 0.0 50.0 1.0 0.0\n\
        1 2 3 4\n\
        5 6 7 8\n\
        9 10 11 999999\n";

    #[test]
    fn test_parse_and_normalize_rows() {
        let (header, grid) = MicapsReader::new().parse(SOUTH_FIRST).unwrap();
        assert_eq!(header.nlon, 4);
        assert_eq!(header.nlat, 3);
        assert_eq!(header.lead_hours, 3);
        assert_eq!(
            header.cycle(),
            NaiveDate::from_ymd_opt(2018, 8, 4).unwrap().and_hms_opt(8, 0, 0)
        );

        // last written row is the northernmost and comes first
        assert_eq!(grid.lat()[[0, 0]], 31.0);
        assert_eq!(grid.values()[[0, 0]], 9.0);
        assert!(grid.values()[[0, 3]].is_nan());
        assert_eq!(grid.values()[[2, 0]], 1.0);
        assert_eq!(grid.lon()[[1, 3]], 111.5);
    }

    #[test]
    fn test_north_first_with_negative_step() {
        let text = "diamond 4 test\n18 08 04 08 3 0 0.5 -0.5 110.0 110.5 31.0 30.0 2 3 1 0 50 1 0\n\
                    1 2 3 4 5 6\n";
        let (_, grid) = MicapsReader::new().parse(text).unwrap();
        assert_eq!(grid.lat()[[0, 0]], 31.0);
        assert_eq!(grid.lat()[[2, 0]], 30.0);
        assert_eq!(grid.values()[[0, 1]], 2.0);
    }

    #[test]
    fn test_truncated_values_rejected() {
        let text = "diamond 4 test\n18 08 04 08 3 0 0.5 0.5 110.0 111.0 30.0 31.0 3 3 1 0 50 1 0\n1 2 3\n";
        assert!(matches!(
            MicapsReader::new().parse(text),
            Err(ProcessingError::InvalidFormat(_))
        ));
        assert!(MicapsReader::new().parse("diamond 3 stations\n").is_err());
    }

    #[test]
    fn test_read_with_mmap() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(SOUTH_FIRST.as_bytes())?;
        let plain = MicapsReader::new().read_grid(file.path())?;
        let mapped = MicapsReader::new().with_mmap(true).read_grid(file.path())?;
        assert_eq!(plain.shape(), mapped.shape());
        assert_eq!(plain.values()[[1, 1]], mapped.values()[[1, 1]]);
        Ok(())
    }
}
