use std::path::{Path, PathBuf};

use crate::models::{ForecastReference, ForecastSystem, ObservationTime};
use crate::utils::constants::{OBSERVATION_EXTENSION, SMS_EXTENSION, SNAPSHOT_EXTENSION};

/// EC file name: `YYMMDDHH.LLL`, cycle in 2-digit-year form and a 3-digit lead.
pub fn ec_identifier(reference: &ForecastReference) -> String {
    format!(
        "{}.{:03}",
        reference.cycle.format("%y%m%d%H"),
        reference.lead_hours
    )
}

/// SMS file name: `YYYYMMDDHH.LLL.nc`.
pub fn sms_identifier(reference: &ForecastReference) -> String {
    format!(
        "{}.{:03}.{}",
        reference.cycle.format("%Y%m%d%H"),
        reference.lead_hours,
        SMS_EXTENSION
    )
}

pub fn forecast_identifier(reference: &ForecastReference) -> String {
    match reference.system {
        ForecastSystem::Ec => ec_identifier(reference),
        ForecastSystem::Sms => sms_identifier(reference),
    }
}

/// Hourly observation file: `YYYYMMDDHH.txt`
pub fn observation_filename(time: &ObservationTime) -> String {
    format!("{}.{}", time.identifier(), OBSERVATION_EXTENSION)
}

/// Composed T-0 snapshot: `YYYYMMDDHH.csv`
pub fn snapshot_filename(time: &ObservationTime) -> String {
    format!("{}.{}", time.identifier(), SNAPSHOT_EXTENSION)
}

pub fn snapshot_path(snapshot_dir: &Path, time: &ObservationTime) -> PathBuf {
    snapshot_dir.join(snapshot_filename(time))
}

/// Lag-window table: `T-{gap}/T-{gap}-YYYYMMDDHH.{extension}`
pub fn feature_table_path(
    output_dir: &Path,
    time: &ObservationTime,
    gap: u32,
    extension: &str,
) -> PathBuf {
    let window = format!("T-{}", gap);
    output_dir
        .join(&window)
        .join(format!("{}-{}.{}", window, time.identifier(), extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn cycle(y: i32, m: u32, d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_forecast_identifiers() {
        let ec = ForecastReference::new(ForecastSystem::Ec, cycle(2018, 8, 4, 8), 3);
        assert_eq!(forecast_identifier(&ec), "18080408.003");

        let sms = ForecastReference::new(ForecastSystem::Sms, cycle(2018, 8, 4, 6), 6);
        assert_eq!(forecast_identifier(&sms), "2018080406.006.nc");
    }

    #[test]
    fn test_feature_table_path() {
        let time = ObservationTime::parse("2018080420").unwrap();
        let path = feature_table_path(Path::new("out"), &time, 12, "csv");
        assert_eq!(path, PathBuf::from("out/T-12/T-12-2018080420.csv"));
        assert_eq!(observation_filename(&time), "2018080420.txt");
        assert_eq!(
            snapshot_path(Path::new("T0"), &time),
            PathBuf::from("T0/2018080420.csv")
        );
    }
}
