use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::models::{
    EcFeature, FeatureColumn, FeatureSchema, ForecastReference, Grid, ObservationTime,
    SourceKind, StationColumns, StationSet, StationSnapshot,
};
use crate::processors::interpolator::{SpatialInterpolator, StationProjector};
use crate::processors::outlier::OutlierCorrector;
use crate::processors::reconciler::StationReconciler;
use crate::processors::time_aligner::{Alignment, TimeAligner};
use crate::readers::grid_store::GridStore;
use crate::readers::observation_reader::{observation_table, ObservationField, ObservationReader};
use crate::utils::constants::ACCUMULATION_HOURS;
use crate::utils::filename::observation_filename;

type StationValues = Vec<Option<f64>>;

/// Builds the T-0 snapshot of one observation time: station observations plus EC and SMS
/// forecasts interpolated to the master station list, with derived features, in schema order.
pub struct FeatureComposer {
    stations: Arc<StationSet>,
    schema: Arc<FeatureSchema>,
    aligner: TimeAligner,
    projector: StationProjector,
    reconciler: StationReconciler,
    outlier: Option<OutlierCorrector>,
    observation_dir: PathBuf,
    observation_reader: ObservationReader,
    ec_store: Arc<dyn GridStore>,
    sms_store: Arc<dyn GridStore>,
}

impl FeatureComposer {
    pub fn new(
        stations: Arc<StationSet>,
        schema: Arc<FeatureSchema>,
        observation_dir: impl Into<PathBuf>,
        ec_store: Arc<dyn GridStore>,
        sms_store: Arc<dyn GridStore>,
    ) -> Self {
        Self {
            projector: StationProjector::new(SpatialInterpolator::default(), &stations),
            reconciler: StationReconciler::new(stations.clone()),
            stations,
            schema,
            aligner: TimeAligner::new(),
            outlier: Some(OutlierCorrector::default()),
            observation_dir: observation_dir.into(),
            observation_reader: ObservationReader::new(),
            ec_store,
            sms_store,
        }
    }

    pub fn with_aligner(mut self, aligner: TimeAligner) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn with_interpolator(mut self, interpolator: SpatialInterpolator) -> Self {
        self.projector = StationProjector::new(interpolator, &self.stations);
        self
    }

    /// `None` turns precipitation outlier correction off.
    pub fn with_outlier(mut self, outlier: Option<OutlierCorrector>) -> Self {
        self.outlier = outlier;
        self
    }

    pub fn with_strict_stations(mut self, strict: bool) -> Self {
        self.reconciler = StationReconciler::new(self.stations.clone()).with_strict(strict);
        self
    }

    pub fn stations(&self) -> &Arc<StationSet> {
        &self.stations
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn aligner(&self) -> &TimeAligner {
        &self.aligner
    }

    pub fn compose(&self, time: &ObservationTime) -> Result<StationSnapshot> {
        let alignment = self.aligner.align(time)?;
        let sms_leads = self.sms_leads(&alignment)?;
        self.require_sources(&alignment, &sms_leads)?;

        debug!("composing {} from {} and {}", time, alignment.ec, alignment.sms);

        let mut data = StationColumns::new(self.stations.clone());
        data.extend(self.observation_features(time)?)?;
        data.extend(self.ec_features(&alignment.ec)?)?;
        data.extend(self.sms_features(&sms_leads)?)?;

        info!(
            "composed {}: {} stations x {} features",
            time,
            self.stations.len(),
            data.len()
        );
        Ok(StationSnapshot::new(*time, data))
    }

    /// Observation files feeding the snapshot: `t`, `t-1h`, `t-2h`.
    pub fn observation_paths(&self, time: &ObservationTime) -> Vec<PathBuf> {
        (0..ACCUMULATION_HOURS)
            .map(|h| {
                self.observation_dir
                    .join(observation_filename(&time.minus_hours(h as i64)))
            })
            .collect()
    }

    /// SMS references behind the precipitation sums, newest lead first.
    fn sms_leads(&self, alignment: &Alignment) -> Result<Vec<ForecastReference>> {
        let lead = alignment.sms.lead_hours;
        if lead < ACCUMULATION_HOURS {
            return Err(ProcessingError::InvalidObservationTime {
                time: alignment.time.identifier(),
                reason: format!(
                    "SMS lead {} is too short for a {}-hour accumulation",
                    lead, ACCUMULATION_HOURS
                ),
            });
        }
        Ok((0..ACCUMULATION_HOURS)
            .map(|h| alignment.sms.with_lead(lead - h))
            .collect())
    }

    /// Every source is checked before anything is read.
    fn require_sources(&self, alignment: &Alignment, sms_leads: &[ForecastReference]) -> Result<()> {
        for path in self.observation_paths(&alignment.time) {
            if !path.is_file() {
                return Err(ProcessingError::MissingSourceFile {
                    path,
                    system: SourceKind::Observation,
                });
            }
        }

        for key in self.referenced_ec_keys() {
            self.ec_store.require(&alignment.ec, self.ec_path(key)?)?;
        }

        let sms = &self.schema.sms;
        for reference in sms_leads {
            self.sms_store.require(reference, &sms.precipitation.variable)?;
        }
        for variable in &sms.variables {
            self.sms_store.require(&sms_leads[0], &variable.variable)?;
        }
        Ok(())
    }

    fn observation_features(&self, time: &ObservationTime) -> Result<Vec<FeatureColumn>> {
        let paths = self.observation_paths(time);
        let mut hourly: Vec<StationColumns> = Vec::with_capacity(paths.len());
        for path in &paths {
            hourly.push(self.read_observations(path)?);
        }

        let column = |data: &StationColumns, field: ObservationField| -> StationValues {
            data.column(field.name())
                .map(<[Option<f64>]>::to_vec)
                .unwrap_or_else(|| vec![None; self.stations.len()])
        };

        let mut precipitation: Vec<StationValues> = hourly
            .iter()
            .map(|data| column(data, ObservationField::Precipitation))
            .collect();
        if let Some(corrector) = &self.outlier {
            for (values, path) in precipitation.iter_mut().zip(&paths) {
                let report = corrector.correct_stations(values);
                if !report.is_clean() {
                    debug!("{}: {} precipitation values clamped", path.display(), report.clamped);
                }
            }
        }

        let current = &hourly[0];
        let wind_max_direction = column(current, ObservationField::WindMaxDirection);
        let wind_mean_direction = column(current, ObservationField::WindMeanDirection);
        let names = &self.schema.observation;

        let columns = vec![
            (&names.precipitation_r3, sum_stations(&precipitation)),
            (&names.precipitation_r2, sum_stations(&precipitation[..2])),
            (&names.precipitation_r1, precipitation[0].clone()),
            (&names.temperature, column(current, ObservationField::Temperature)),
            (&names.dew_point, column(current, ObservationField::DewPoint)),
            (&names.relative_humidity, column(current, ObservationField::RelativeHumidity)),
            (&names.wind_max, column(current, ObservationField::WindMaxSpeed)),
            (&names.wind_max_direction, wind_max_direction.clone()),
            (&names.wind_max_cos, map_stations(&wind_max_direction, direction_cos)),
            (&names.wind_max_sin, map_stations(&wind_max_direction, direction_sin)),
            (&names.wind_mean, column(current, ObservationField::WindMeanSpeed)),
            (&names.wind_mean_direction, wind_mean_direction.clone()),
            (&names.wind_mean_cos, map_stations(&wind_mean_direction, direction_cos)),
            (&names.wind_mean_sin, map_stations(&wind_mean_direction, direction_sin)),
        ];
        Ok(columns
            .into_iter()
            .map(|(name, values)| FeatureColumn::new(name.clone(), values))
            .collect())
    }

    fn read_observations(&self, path: &Path) -> Result<StationColumns> {
        let records = self.observation_reader.read(path)?;
        let fields: Vec<(ObservationField, String)> = ObservationField::ALL
            .iter()
            .map(|f| (*f, f.name().to_string()))
            .collect();
        let table = observation_table(&records, &fields)?;
        let (data, report) = self.reconciler.reconcile(&table)?;
        if !report.missing.is_empty() {
            debug!(
                "{}: {} master stations not reported",
                path.display(),
                report.missing.len()
            );
        }
        Ok(data)
    }

    fn ec_features(&self, reference: &ForecastReference) -> Result<Vec<FeatureColumn>> {
        let mut projected: HashMap<&str, StationValues> = HashMap::new();
        for key in self.referenced_ec_keys() {
            let grid = self.ec_store.load(reference, self.ec_path(key)?)?;
            projected.insert(key, self.projector.project(&grid)?);
        }

        let field = |key: &str| -> Result<&StationValues> {
            projected
                .get(key)
                .ok_or_else(|| ProcessingError::Schema(format!("EC field '{}' was not loaded", key)))
        };

        self.schema
            .ec
            .features
            .iter()
            .map(|feature| {
                let values = match feature {
                    EcFeature::Field { key, .. } => field(key)?.clone(),
                    EcFeature::Mean { keys, .. } => {
                        let parts = keys.iter().map(|k| field(k)).collect::<Result<Vec<_>>>()?;
                        reduce_stations(&parts, |v| v.iter().sum::<f64>() / v.len() as f64)
                    }
                    EcFeature::Max { keys, .. } => {
                        let parts = keys.iter().map(|k| field(k)).collect::<Result<Vec<_>>>()?;
                        reduce_stations(&parts, |v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max))
                    }
                    EcFeature::WindCos { u, v, .. } => {
                        zip_stations(field(u)?, field(v)?, |u, v| wind_component(v, u, v))
                    }
                    EcFeature::WindSin { u, v, .. } => {
                        zip_stations(field(u)?, field(v)?, |u, v| wind_component(u, u, v))
                    }
                    EcFeature::Difference {
                        minuend,
                        subtrahend,
                        ..
                    } => zip_stations(field(minuend)?, field(subtrahend)?, |a, b| Some(a - b)),
                };
                Ok(FeatureColumn::new(feature.column(), values))
            })
            .collect()
    }

    fn sms_features(&self, leads: &[ForecastReference]) -> Result<Vec<FeatureColumn>> {
        let sms = &self.schema.sms;

        let mut hourly: Vec<StationValues> = Vec::with_capacity(leads.len());
        for reference in leads {
            let mut grid = self.sms_store.load(reference, &sms.precipitation.variable)?;
            if let Some(corrector) = &self.outlier {
                grid = self.corrected(grid, corrector, reference)?;
            }
            hourly.push(self.projector.project(&grid)?);
        }

        let mut columns = vec![
            FeatureColumn::new(sms.precipitation.r3_column.clone(), sum_stations(&hourly)),
            FeatureColumn::new(sms.precipitation.r2_column.clone(), sum_stations(&hourly[..2])),
            FeatureColumn::new(sms.precipitation.r1_column.clone(), hourly[0].clone()),
        ];
        for variable in &sms.variables {
            let grid = self.sms_store.load(&leads[0], &variable.variable)?;
            columns.push(FeatureColumn::new(
                variable.column.clone(),
                self.projector.project(&grid)?,
            ));
        }
        Ok(columns)
    }

    fn corrected(&self, grid: Grid, corrector: &OutlierCorrector, reference: &ForecastReference) -> Result<Grid> {
        let mut values = grid.values().clone();
        let report = corrector.correct_grid(&mut values);
        if report.is_clean() {
            return Ok(grid);
        }
        debug!("{}: {} grid values clamped", reference, report.clamped);
        grid.with_values(values)
    }

    /// Field keys any EC feature reads, in declaration order.
    fn referenced_ec_keys(&self) -> Vec<&str> {
        let ec = &self.schema.ec;
        ec.fields
            .iter()
            .map(|f| f.key.as_str())
            .filter(|key| ec.features.iter().any(|feature| feature.keys().contains(key)))
            .collect()
    }

    fn ec_path(&self, key: &str) -> Result<&str> {
        self.schema
            .ec
            .field(key)
            .map(|f| f.path.as_str())
            .ok_or_else(|| ProcessingError::Schema(format!("unknown EC field '{}'", key)))
    }
}

/// Elementwise sum; missing if any part is missing.
fn sum_stations(parts: &[StationValues]) -> StationValues {
    let refs: Vec<&StationValues> = parts.iter().collect();
    reduce_stations(&refs, |v| v.iter().sum())
}

fn reduce_stations(parts: &[&StationValues], reduce: impl Fn(&[f64]) -> f64) -> StationValues {
    let len = parts.first().map_or(0, |p| p.len());
    let mut buffer = Vec::with_capacity(parts.len());
    (0..len)
        .map(|i| {
            buffer.clear();
            for part in parts {
                buffer.push(part[i]?);
            }
            Some(reduce(&buffer))
        })
        .collect()
}

fn zip_stations(a: &StationValues, b: &StationValues, f: impl Fn(f64, f64) -> Option<f64>) -> StationValues {
    a.iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => f(*a, *b),
            _ => None,
        })
        .collect()
}

fn map_stations(values: &StationValues, f: impl Fn(f64) -> f64) -> StationValues {
    values.iter().map(|v| v.map(&f)).collect()
}

fn direction_cos(degrees: f64) -> f64 {
    degrees.to_radians().cos()
}

fn direction_sin(degrees: f64) -> f64 {
    degrees.to_radians().sin()
}

/// One wind component over the speed; undefined for calm air.
fn wind_component(component: f64, u: f64, v: f64) -> Option<f64> {
    let speed = u.hypot(v);
    if speed > 0.0 {
        Some(component / speed)
    } else {
        None
    }
}
