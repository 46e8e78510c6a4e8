use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProcessingError, Result};
use crate::models::{ForecastReference, ForecastSystem, ObservationTime};
use crate::utils::constants::{
    EC_UTC_SHIFT_HOURS, LOCAL_UTC_OFFSET_HOURS, SMS_CYCLE_INTERVAL_HOURS, SYNOPTIC_HOURS,
};

/// Clock the EC file names are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EcTimeBasis {
    /// Cycles named 08/20 local time.
    #[default]
    Local,
    /// Observation shifted back 9 hours before bucketing.
    Utc,
}

impl fmt::Display for EcTimeBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcTimeBasis::Local => write!(f, "local"),
            EcTimeBasis::Utc => write!(f, "utc"),
        }
    }
}

/// Both forecast references for one observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Alignment {
    pub time: ObservationTime,
    pub ec: ForecastReference,
    pub sms: ForecastReference,
}

/// Maps local observation times to the nearest preceding forecast cycle past cold start.
#[derive(Debug, Clone, Default)]
pub struct TimeAligner {
    ec_basis: EcTimeBasis,
}

impl TimeAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ec_basis(mut self, ec_basis: EcTimeBasis) -> Self {
        self.ec_basis = ec_basis;
        self
    }

    pub fn ec_basis(&self) -> EcTimeBasis {
        self.ec_basis
    }

    pub fn resolve(&self, time: &ObservationTime, system: ForecastSystem) -> Result<ForecastReference> {
        if !time.is_synoptic() {
            return Err(ProcessingError::InvalidObservationTime {
                time: time.identifier(),
                reason: format!(
                    "hour {:02} is not one of the synoptic hours {:?}",
                    time.hour(),
                    SYNOPTIC_HOURS
                ),
            });
        }

        match system {
            ForecastSystem::Ec => {
                let basis_time = match self.ec_basis {
                    EcTimeBasis::Local => time.datetime(),
                    EcTimeBasis::Utc => time.datetime() - Duration::hours(EC_UTC_SHIFT_HOURS),
                };
                ec_reference(basis_time, time)
            }
            ForecastSystem::Sms => Ok(sms_reference(time.datetime())),
        }
    }

    pub fn align(&self, time: &ObservationTime) -> Result<Alignment> {
        Ok(Alignment {
            time: *time,
            ec: self.resolve(time, ForecastSystem::Ec)?,
            sms: self.resolve(time, ForecastSystem::Sms)?,
        })
    }
}

/// EC runs start at 08 and 20. Leads of 3 to 12 hours are used:
/// `{11,14,17,20}` from the 08 run, `23` from the 20 run, `{02,05,08}` from the previous day's 20 run.
fn ec_reference(basis_time: NaiveDateTime, original: &ObservationTime) -> Result<ForecastReference> {
    let hour = basis_time.hour();
    let date = basis_time.date();

    let (cycle_date, cycle_hour, lead) = match hour {
        11 | 14 | 17 | 20 => (date, 8, hour - 8),
        23 => (date, 20, 3),
        2 | 5 | 8 => (date - Duration::days(1), 20, hour + 4),
        _ => {
            return Err(ProcessingError::InvalidObservationTime {
                time: original.identifier(),
                reason: format!("shifted hour {:02} has no EC cycle", hour),
            })
        }
    };

    let cycle = cycle_date.and_hms_opt(cycle_hour, 0, 0).ok_or_else(|| {
        ProcessingError::InvalidObservationTime {
            time: original.identifier(),
            reason: format!("no EC cycle at {:02}:00", cycle_hour),
        }
    })?;
    Ok(ForecastReference::new(ForecastSystem::Ec, cycle, lead))
}

/// SMS runs start every 6 hours in UTC with hourly leads. Lead 0 is never used, so an hour that
/// falls on a cycle boundary comes from the previous cycle at lead 6 (UTC 00 rolls back a day).
fn sms_reference(local: NaiveDateTime) -> ForecastReference {
    let utc = local - Duration::hours(LOCAL_UTC_OFFSET_HOURS);
    let lead = (utc.hour() as i64 - 1).rem_euclid(SMS_CYCLE_INTERVAL_HOURS as i64) + 1;
    let cycle = utc - Duration::hours(lead);
    ForecastReference::new(ForecastSystem::Sms, cycle, lead as u32)
}
