use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::error::{ProcessingError, Result};

/// Relative tolerance when deciding whether a mesh has constant spacing.
const REGULAR_TOLERANCE: f64 = 1e-6;

/// Geographic window `[lat_min, lat_max] x [lon_min, lon_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct BoundingBox {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat_min: f64,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat_max: f64,
    #[validate(range(min = -180.0, max = 360.0))]
    pub lon_min: f64,
    #[validate(range(min = -180.0, max = 360.0))]
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }
}

impl Default for BoundingBox {
    /// The fusion region used for the East China cases.
    fn default() -> Self {
        Self::new(30.0, 50.0, 105.0, 125.0)
    }
}

/// Coordinates of every grid node. Row 0 is always the northernmost row.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    lon: Array2<f64>,
    lat: Array2<f64>,
}

impl Mesh {
    pub fn new(lon: Array2<f64>, lat: Array2<f64>) -> Result<Self> {
        if lon.dim() != lat.dim() {
            return Err(ProcessingError::InvalidGrid(format!(
                "lon {:?} and lat {:?} shapes differ",
                lon.dim(),
                lat.dim()
            )));
        }
        if lon.is_empty() {
            return Err(ProcessingError::InvalidGrid("empty mesh".to_string()));
        }
        Ok(Self { lon, lat })
    }

    /// Mesh of a regular lon/lat lattice, north-first.
    pub fn regular(lons: &[f64], lats: &[f64]) -> Result<Self> {
        let mut lats = lats.to_vec();
        if lats.len() > 1 && lats[0] < lats[lats.len() - 1] {
            lats.reverse();
        }
        let rows = lats.len();
        let cols = lons.len();
        let lon = Array2::from_shape_fn((rows, cols), |(_, j)| lons[j]);
        let lat = Array2::from_shape_fn((rows, cols), |(i, _)| lats[i]);
        Self::new(lon, lat)
    }

    pub fn lon(&self) -> &Array2<f64> {
        &self.lon
    }

    pub fn lat(&self) -> &Array2<f64> {
        &self.lat
    }

    pub fn shape(&self) -> (usize, usize) {
        self.lon.dim()
    }

    /// True when rows run south to north and need flipping.
    fn is_south_first(&self) -> bool {
        let rows = self.lat.nrows();
        rows > 1 && self.lat[[0, 0]] < self.lat[[rows - 1, 0]]
    }

    /// `(dlon, dlat)` if the mesh is a regular lattice; `dlat` is positive.
    pub fn regular_spacing(&self) -> Option<(f64, f64)> {
        let (rows, cols) = self.shape();
        if rows < 2 || cols < 2 {
            return None;
        }
        let dlon = self.lon[[0, 1]] - self.lon[[0, 0]];
        let dlat = self.lat[[0, 0]] - self.lat[[1, 0]];
        if dlon <= 0.0 || dlat <= 0.0 {
            return None;
        }

        let lon_ok = self.lon.indexed_iter().all(|((_, j), &v)| {
            let expected = self.lon[[0, 0]] + j as f64 * dlon;
            (v - expected).abs() <= REGULAR_TOLERANCE * dlon.max(1.0) * (cols as f64)
        });
        let lat_ok = self.lat.indexed_iter().all(|((i, _), &v)| {
            let expected = self.lat[[0, 0]] - i as f64 * dlat;
            (v - expected).abs() <= REGULAR_TOLERANCE * dlat.max(1.0) * (rows as f64)
        });

        (lon_ok && lat_ok).then_some((dlon, dlat))
    }

    pub fn lon_min(&self) -> f64 {
        self.lon.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn lat_min(&self) -> f64 {
        self.lat.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn window(&self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Self {
        Self {
            lon: self.lon.slice(s![rows.clone(), cols.clone()]).to_owned(),
            lat: self.lat.slice(s![rows, cols]).to_owned(),
        }
    }
}

/// A decoded physical field on a mesh. Missing nodes hold `NaN`.
#[derive(Debug, Clone)]
pub struct Grid {
    mesh: Arc<Mesh>,
    values: Array2<f64>,
}

impl Grid {
    /// Build a grid, flipping south-first arrays so row 0 is the northernmost row.
    pub fn new(lon: Array2<f64>, lat: Array2<f64>, values: Array2<f64>) -> Result<Self> {
        let mesh = Mesh::new(lon, lat)?;
        Self::on_mesh(Arc::new(mesh), values)
    }

    pub fn on_mesh(mesh: Arc<Mesh>, values: Array2<f64>) -> Result<Self> {
        if mesh.shape() != values.dim() {
            return Err(ProcessingError::InvalidGrid(format!(
                "values {:?} do not match mesh {:?}",
                values.dim(),
                mesh.shape()
            )));
        }

        if mesh.is_south_first() {
            let flipped = Mesh {
                lon: flip_rows(&mesh.lon),
                lat: flip_rows(&mesh.lat),
            };
            return Ok(Self {
                mesh: Arc::new(flipped),
                values: flip_rows(&values),
            });
        }

        Ok(Self { mesh, values })
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn lon(&self) -> &Array2<f64> {
        &self.mesh.lon
    }

    pub fn lat(&self) -> &Array2<f64> {
        &self.mesh.lat
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get((row, col)).copied().filter(|v| v.is_finite())
    }

    /// Same mesh, new values. Used for sums of hourly fields.
    pub fn with_values(&self, values: Array2<f64>) -> Result<Self> {
        Self::on_mesh(self.mesh.clone(), values)
    }

    /// Cut the grid down to the rows/columns with nodes inside `bbox`, keeping a
    /// one-node margin so interpolation at the window edge still has neighbours.
    /// Returns the grid unchanged if no node falls inside.
    pub fn crop(&self, bbox: &BoundingBox) -> Self {
        let (rows, cols) = self.shape();
        let mut row_range: Option<(usize, usize)> = None;
        let mut col_range: Option<(usize, usize)> = None;

        for ((i, j), &lon) in self.mesh.lon.indexed_iter() {
            if bbox.contains(lon, self.mesh.lat[[i, j]]) {
                row_range = Some(row_range.map_or((i, i), |(a, b)| (a.min(i), b.max(i))));
                col_range = Some(col_range.map_or((j, j), |(a, b)| (a.min(j), b.max(j))));
            }
        }

        match (row_range, col_range) {
            (Some((r0, r1)), Some((c0, c1))) => {
                let rows_window = r0.saturating_sub(1)..(r1 + 2).min(rows);
                let cols_window = c0.saturating_sub(1)..(c1 + 2).min(cols);
                if rows_window.len() == rows && cols_window.len() == cols {
                    return self.clone();
                }
                Self {
                    mesh: Arc::new(self.mesh.window(rows_window.clone(), cols_window.clone())),
                    values: self
                        .values
                        .slice(s![rows_window, cols_window])
                        .to_owned(),
                }
            }
            _ => self.clone(),
        }
    }
}

fn flip_rows(array: &Array2<f64>) -> Array2<f64> {
    array.slice(s![..;-1, ..]).to_owned()
}

/// Evenly spaced axis from `start` to `end` inclusive, as `np.arange(start, end + step, step)`.
pub fn axis_range(start: f64, end: f64, step: f64) -> Array1<f64> {
    let count = ((end - start) / step + 1e-9).floor() as usize + 1;
    Array1::from_shape_fn(count, |k| start + k as f64 * step)
}

/// Stack equally shaped fields elementwise; `NaN` anywhere gives `NaN`.
pub fn sum_values<'a>(grids: impl IntoIterator<Item = &'a Grid>) -> Option<Array2<f64>> {
    let mut iter = grids.into_iter();
    let first = iter.next()?.values.clone();
    Some(iter.fold(first, |acc, g| acc + &g.values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn south_first_grid() -> Grid {
        let lon = array![[110.0, 111.0], [110.0, 111.0]];
        let lat = array![[30.0, 30.0], [31.0, 31.0]];
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        Grid::new(lon, lat, values).unwrap()
    }

    #[test]
    fn test_rows_normalized_north_first() {
        let grid = south_first_grid();
        assert_eq!(grid.lat()[[0, 0]], 31.0);
        assert_eq!(grid.values()[[0, 0]], 3.0);
        assert_eq!(grid.values()[[1, 1]], 2.0);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let lon = array![[110.0, 111.0]];
        let lat = array![[30.0, 30.0]];
        let values = array![[1.0], [2.0]];
        assert!(Grid::new(lon, lat, values).is_err());
    }

    #[test]
    fn test_regular_spacing() {
        let mesh = Mesh::regular(&[110.0, 110.5, 111.0], &[30.0, 30.5, 31.0]).unwrap();
        assert_eq!(mesh.lat()[[0, 0]], 31.0);
        let (dlon, dlat) = mesh.regular_spacing().unwrap();
        assert!((dlon - 0.5).abs() < 1e-12);
        assert!((dlat - 0.5).abs() < 1e-12);

        let lon = array![[110.0, 110.5, 111.5], [110.0, 110.5, 111.5]];
        let lat = array![[31.0, 31.0, 31.0], [30.0, 30.0, 30.0]];
        let irregular = Mesh::new(lon, lat).unwrap();
        assert!(irregular.regular_spacing().is_none());
    }

    #[test]
    fn test_crop_keeps_margin() {
        let lons: Vec<f64> = (0..10).map(|k| 100.0 + k as f64).collect();
        let lats: Vec<f64> = (0..10).map(|k| 25.0 + k as f64).collect();
        let mesh = Arc::new(Mesh::regular(&lons, &lats).unwrap());
        let grid = Grid::on_mesh(mesh, Array2::zeros((10, 10))).unwrap();

        let cropped = grid.crop(&BoundingBox::new(28.0, 30.0, 103.0, 105.0));
        // three nodes each way plus one margin node on both sides
        assert_eq!(cropped.shape(), (5, 5));
        assert_eq!(cropped.lat()[[0, 0]], 31.0);
        assert_eq!(cropped.lon()[[0, 0]], 102.0);
    }

    #[test]
    fn test_axis_range_inclusive() {
        let axis = axis_range(105.0, 106.0, 0.25);
        assert_eq!(axis.len(), 5);
        assert!((axis[4] - 106.0).abs() < 1e-12);
    }
}
