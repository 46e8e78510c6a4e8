//! SMS regional model output (NetCDF, curvilinear `ELON`/`NLAT` coordinates).
//!
//! Decoding needs the `netcdf` cargo feature and the system netCDF library. Without it the
//! reader still resolves paths but every load fails with a configuration error.

use std::path::Path;

use crate::error::{ProcessingError, Result};
use crate::models::Grid;

/// Values at or beyond this magnitude are fill values.
#[cfg_attr(not(feature = "netcdf"), allow(dead_code))]
const FILL_MAGNITUDE: f64 = 1.0e30;

#[derive(Debug, Clone)]
pub struct NetcdfReader {
    lon_variable: String,
    lat_variable: String,
}

impl NetcdfReader {
    pub fn new(lon_variable: impl Into<String>, lat_variable: impl Into<String>) -> Self {
        Self {
            lon_variable: lon_variable.into(),
            lat_variable: lat_variable.into(),
        }
    }

    pub fn lon_variable(&self) -> &str {
        &self.lon_variable
    }

    pub fn lat_variable(&self) -> &str {
        &self.lat_variable
    }

    #[cfg(feature = "netcdf")]
    pub fn read_variable(&self, path: &Path, variable: &str) -> Result<Grid> {
        let file = netcdf::open(path)?;

        let lon = read_2d(&file, &self.lon_variable)?;
        let lat = read_2d(&file, &self.lat_variable)?;
        let values = read_2d(&file, variable)?;

        Grid::new(lon, lat, values)
    }

    #[cfg(not(feature = "netcdf"))]
    pub fn read_variable(&self, path: &Path, variable: &str) -> Result<Grid> {
        Err(ProcessingError::Config(format!(
            "cannot read '{}' from {}: built without the `netcdf` feature",
            variable,
            path.display()
        )))
    }
}

#[cfg(feature = "netcdf")]
fn read_2d(file: &netcdf::File, name: &str) -> Result<ndarray::Array2<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("variable '{}' not found", name)))?;

    let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    // trailing two dimensions are (y, x); leading ones (time, level) are length one
    if dims.len() < 2 || dims[..dims.len() - 2].iter().any(|&d| d != 1) {
        return Err(ProcessingError::InvalidGrid(format!(
            "variable '{}' has shape {:?}, expected a single 2D field",
            name, dims
        )));
    }
    let (rows, cols) = (dims[dims.len() - 2], dims[dims.len() - 1]);

    let fill = fill_value(&var);
    let raw: Vec<f64> = var.get_values::<f64, _>(..)?;
    let cleaned: Vec<f64> = raw
        .into_iter()
        .map(|v| {
            let is_fill = !v.is_finite()
                || v.abs() >= FILL_MAGNITUDE
                || fill.is_some_and(|f| (v - f).abs() <= f.abs() * 1e-6);
            if is_fill {
                f64::NAN
            } else {
                v
            }
        })
        .collect();

    ndarray::Array2::from_shape_vec((rows, cols), cleaned)
        .map_err(|e| ProcessingError::InvalidGrid(format!("variable '{}': {}", name, e)))
}

#[cfg(feature = "netcdf")]
fn fill_value(var: &netcdf::Variable) -> Option<f64> {
    use netcdf::AttributeValue;

    match var.attribute("_FillValue")?.value().ok()? {
        AttributeValue::Float(f) => Some(f as f64),
        AttributeValue::Double(d) => Some(d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_names() {
        let reader = NetcdfReader::new("ELON_P0_L1_GLC0", "NLAT_P0_L1_GLC0");
        assert_eq!(reader.lon_variable(), "ELON_P0_L1_GLC0");
        assert_eq!(reader.lat_variable(), "NLAT_P0_L1_GLC0");
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn test_disabled_feature_reports_config_error() {
        let reader = NetcdfReader::new("lon", "lat");
        let result = reader.read_variable(Path::new("2018080406.006.nc"), "APCP");
        assert!(matches!(result, Err(ProcessingError::Config(_))));
    }
}
