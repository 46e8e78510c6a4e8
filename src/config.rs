use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;

use crate::error::Result;
use crate::models::{BoundingBox, FeatureSchema};
use crate::processors::{
    EcTimeBasis, InterpolationMethod, OutlierConfig, OutlierCorrector, SpatialInterpolator,
    TimeAligner,
};
use crate::utils::constants::{CONFIG_ENV_PREFIX, STATIONS_FILE};
use crate::writers::{OutputFormat, ParquetWriter};

/// Where inputs are read from and outputs written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PathsConfig {
    pub stations_file: PathBuf,
    /// Hourly station observations, `YYYYMMDDHH.txt`.
    pub observation_dir: PathBuf,
    /// Root of the EC field directories (`TP/r3`, `U/850`, ...).
    pub ec_root: PathBuf,
    /// SMS NetCDF files, `YYYYMMDDHH.LLL.nc`.
    pub sms_dir: PathBuf,
    /// Composed T-0 snapshots.
    pub snapshot_dir: PathBuf,
    /// Lag-window tables, one `T-{gap}` directory per window.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stations_file: PathBuf::from(STATIONS_FILE),
            observation_dir: PathBuf::from("surface"),
            ec_root: PathBuf::from("ecmwf_thin"),
            sms_dir: PathBuf::from("sms"),
            snapshot_dir: PathBuf::from("T0"),
            output_dir: PathBuf::from("features"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InterpolationConfig {
    pub method: InterpolationMethod,
    /// Output spacing in degrees when stations are gridded.
    #[validate(range(min = 0.001))]
    pub resolution: Option<f64>,
}

/// Full pipeline configuration: built-in defaults, then an optional file, then
/// `PRECIP_FUSION_*` environment variables (`__` separates nested keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    #[validate(nested)]
    pub paths: PathsConfig,
    #[validate(nested)]
    pub region: BoundingBox,
    #[validate(nested)]
    pub interpolation: InterpolationConfig,
    #[validate(nested)]
    pub outlier: OutlierConfig,
    pub ec_time_basis: EcTimeBasis,
    pub schema: FeatureSchema,
    #[validate(range(min = 1))]
    pub workers: usize,
    pub overwrite: bool,
    pub output_format: OutputFormat,
    pub compression: String,
    pub strict_stations: bool,
    pub use_mmap: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            region: BoundingBox::default(),
            interpolation: InterpolationConfig::default(),
            outlier: OutlierConfig::default(),
            ec_time_basis: EcTimeBasis::default(),
            schema: FeatureSchema::default(),
            workers: num_cpus::get(),
            overwrite: false,
            output_format: OutputFormat::default(),
            compression: "snappy".to_string(),
            strict_stations: false,
            use_mmap: false,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Everything that can be rejected before a file is touched.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.schema.validate()?;
        if self.outlier.enabled {
            OutlierCorrector::from_config(&self.outlier)?;
        }
        ParquetWriter::new().with_compression(&self.compression)?;
        Ok(())
    }

    pub fn outlier_corrector(&self) -> Result<Option<OutlierCorrector>> {
        if !self.outlier.enabled {
            return Ok(None);
        }
        OutlierCorrector::from_config(&self.outlier).map(Some)
    }

    pub fn interpolator(&self) -> SpatialInterpolator {
        SpatialInterpolator::new(self.interpolation.method)
    }

    pub fn aligner(&self) -> TimeAligner {
        TimeAligner::new().with_ec_basis(self.ec_time_basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingError;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.check().unwrap();
        assert_eq!(config.region, BoundingBox::new(30.0, 50.0, 105.0, 125.0));
        assert_eq!(config.outlier.max_threshold, 50.0);
        assert_eq!(config.interpolation.method, InterpolationMethod::Linear);
        assert!(config.outlier_corrector().unwrap().is_some());
    }

    #[test]
    fn test_load_file_over_defaults() {
        let file = toml_file(
            r#"
workers = 3
ec_time_basis = "utc"
output_format = "parquet"

[paths]
observation_dir = "/data/surface"

[region]
lat_min = 28.0
lat_max = 36.0
lon_min = 110.0
lon_max = 122.0

[outlier]
max_threshold = 40.0
until_stable = false

[interpolation]
method = "cubic"
"#,
        );

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.ec_time_basis, EcTimeBasis::Utc);
        assert_eq!(config.output_format, OutputFormat::Parquet);
        assert_eq!(config.paths.observation_dir, PathBuf::from("/data/surface"));
        assert_eq!(config.paths.snapshot_dir, PathBuf::from("T0"));
        assert_eq!(config.region.lat_min, 28.0);
        assert_eq!(config.outlier.max_threshold, 40.0);
        assert_eq!(config.outlier.min_threshold, 1.0);
        assert!(!config.outlier.until_stable);
        assert_eq!(config.interpolation.method, InterpolationMethod::Cubic);
        assert_eq!(config.schema, FeatureSchema::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = toml_file("workers = 0\n");
        assert!(matches!(
            PipelineConfig::load(Some(file.path())),
            Err(ProcessingError::Validation(_))
        ));

        let file = toml_file("[outlier]\nmax_threshold = 1.0\nmin_threshold = 5.0\n");
        assert!(matches!(
            PipelineConfig::load(Some(file.path())),
            Err(ProcessingError::Config(_))
        ));

        let file = toml_file("compression = \"brotli\"\n");
        assert!(PipelineConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = PipelineConfig::load(Some(Path::new("/nonexistent/precip-fusion.toml")));
        assert!(matches!(result, Err(ProcessingError::ConfigLoad(_))));
    }
}
