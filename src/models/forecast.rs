use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{ProcessingError, Result};

/// A local-time (UTC+8) observation timestamp at whole-hour resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservationTime(NaiveDateTime);

impl ObservationTime {
    pub fn new(time: NaiveDateTime) -> Self {
        Self(time)
    }

    pub fn from_ymdh(year: i32, month: u32, day: u32, hour: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .map(Self)
            .ok_or_else(|| ProcessingError::InvalidObservationTime {
                time: format!("{:04}{:02}{:02}{:02}", year, month, day, hour),
                reason: "not a calendar date".to_string(),
            })
    }

    /// Parse a `YYMMDDHH` or `YYYYMMDDHH` identifier. A file name or path is accepted;
    /// everything after the first `.` of the file name is ignored.
    pub fn parse(identifier: &str) -> Result<Self> {
        let stem = Path::new(identifier)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(identifier);
        let digits = stem.split('.').next().unwrap_or(stem);

        let invalid = |reason: &str| ProcessingError::InvalidObservationTime {
            time: identifier.to_string(),
            reason: reason.to_string(),
        };

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("identifier must be numeric"));
        }

        let (year, rest) = match digits.len() {
            8 => (2000 + digits[0..2].parse::<i32>().map_err(|_| invalid("bad year"))?, &digits[2..]),
            10 => (digits[0..4].parse::<i32>().map_err(|_| invalid("bad year"))?, &digits[4..]),
            _ => return Err(invalid("expected YYMMDDHH or YYYYMMDDHH")),
        };

        let month = rest[0..2].parse::<u32>().map_err(|_| invalid("bad month"))?;
        let day = rest[2..4].parse::<u32>().map_err(|_| invalid("bad day"))?;
        let hour = rest[4..6].parse::<u32>().map_err(|_| invalid("bad hour"))?;

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .map(Self)
            .ok_or_else(|| invalid("not a calendar date"))
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn is_synoptic(&self) -> bool {
        crate::utils::constants::SYNOPTIC_HOURS.contains(&self.hour())
    }

    pub fn minus_hours(&self, hours: i64) -> Self {
        Self(self.0 - Duration::hours(hours))
    }

    /// `YYYYMMDDHH`, the identifier used for observation, snapshot and feature files.
    pub fn identifier(&self) -> String {
        self.0.format("%Y%m%d%H").to_string()
    }
}

impl fmt::Display for ObservationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:00"))
    }
}

/// Gridded forecast systems fused with the observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastSystem {
    /// Global model, cycles at 08 and 20 local time, 3-hourly leads.
    Ec,
    /// Regional model, cycles at 00/06/12/18 UTC, hourly leads.
    Sms,
}

impl ForecastSystem {
    /// Leads below this are cold-start output and never selected.
    pub fn min_lead_hours(&self) -> u32 {
        match self {
            ForecastSystem::Ec => 3,
            ForecastSystem::Sms => 1,
        }
    }

    pub fn lead_resolution_hours(&self) -> u32 {
        match self {
            ForecastSystem::Ec => 3,
            ForecastSystem::Sms => 1,
        }
    }
}

impl fmt::Display for ForecastSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastSystem::Ec => write!(f, "EC"),
            ForecastSystem::Sms => write!(f, "SMS"),
        }
    }
}

/// Upstream source a file belongs to, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Observation,
    Ec,
    Sms,
    Snapshot,
}

impl From<ForecastSystem> for SourceKind {
    fn from(system: ForecastSystem) -> Self {
        match system {
            ForecastSystem::Ec => SourceKind::Ec,
            ForecastSystem::Sms => SourceKind::Sms,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Observation => write!(f, "observation"),
            SourceKind::Ec => write!(f, "EC"),
            SourceKind::Sms => write!(f, "SMS"),
            SourceKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Identifies one forecast file: the run start and the lead into that run.
///
/// The cycle is expressed in the system's own file-naming clock (local time for the
/// EC local basis, UTC for SMS and the EC UTC basis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastReference {
    pub system: ForecastSystem,
    pub cycle: NaiveDateTime,
    pub lead_hours: u32,
}

impl ForecastReference {
    pub fn new(system: ForecastSystem, cycle: NaiveDateTime, lead_hours: u32) -> Self {
        Self {
            system,
            cycle,
            lead_hours,
        }
    }

    pub fn valid_time(&self) -> NaiveDateTime {
        self.cycle + Duration::hours(self.lead_hours as i64)
    }

    /// Same cycle, earlier lead. Used to gather the hourly files behind an accumulation.
    pub fn with_lead(&self, lead_hours: u32) -> Self {
        Self {
            lead_hours,
            ..*self
        }
    }
}

impl fmt::Display for ForecastReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycle {} +{:03}h",
            self.system,
            self.cycle.format("%Y-%m-%d %H:00"),
            self.lead_hours
        )
    }
}
