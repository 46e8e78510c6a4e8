use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};
use crate::models::grid::axis_range;
use crate::models::{BoundingBox, Grid, Mesh, StationSet};
use crate::processors::triangulation::{barycentric, Triangulation};

/// Meshes kept by a [`StationProjector`] before the oldest is evicted.
const LOCATION_CACHE_CAPACITY: usize = 8;

/// Keys cubic convolution parameter.
const KEYS_A: f64 = -0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    #[default]
    Linear,
    Cubic,
    Nearest,
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationMethod::Linear => write!(f, "linear"),
            InterpolationMethod::Cubic => write!(f, "cubic"),
            InterpolationMethod::Nearest => write!(f, "nearest"),
        }
    }
}

/// Where a station falls inside a mesh cell.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CellHit {
    /// Fractional row/column position in index space.
    fi: f64,
    fj: f64,
    corners: [(usize, usize); 3],
    weights: [f64; 3],
}

/// Precomputed cell positions of a station list on one mesh.
#[derive(Debug, Clone)]
pub struct StationLocations {
    mesh: Arc<Mesh>,
    hits: Vec<Option<CellHit>>,
}

impl StationLocations {
    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Stations that fall inside the mesh.
    pub fn covered(&self) -> usize {
        self.hits.iter().filter(|h| h.is_some()).count()
    }

    fn matches(&self, mesh: &Arc<Mesh>) -> bool {
        Arc::ptr_eq(&self.mesh, mesh) || *self.mesh == **mesh
    }
}

/// Grid to station and station to grid resampling.
#[derive(Debug, Clone, Default)]
pub struct SpatialInterpolator {
    method: InterpolationMethod,
}

impl SpatialInterpolator {
    pub fn new(method: InterpolationMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Interpolate scattered station values onto a regular lattice covering `bbox`.
    ///
    /// Stations with a missing value are left out of the triangulation. Nodes outside
    /// the convex hull of the remaining stations are `NaN`.
    pub fn station_to_grid(
        &self,
        lons: &[f64],
        lats: &[f64],
        values: &[Option<f64>],
        bbox: &BoundingBox,
        resolution: f64,
    ) -> Result<Grid> {
        if lons.len() != lats.len() || lons.len() != values.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "station arrays differ in length: {} lons, {} lats, {} values",
                lons.len(),
                lats.len(),
                values.len()
            )));
        }
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ProcessingError::InvalidGrid(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }

        let grid_lons = axis_range(bbox.lon_min, bbox.lon_max, resolution).to_vec();
        let grid_lats = axis_range(bbox.lat_min, bbox.lat_max, resolution).to_vec();
        let mesh = Arc::new(Mesh::regular(&grid_lons, &grid_lats)?);

        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(lons.len());
        let mut samples = Vec::with_capacity(lons.len());
        for ((&lon, &lat), value) in lons.iter().zip(lats).zip(values) {
            let Some(value) = value.filter(|v| v.is_finite()) else {
                continue;
            };
            if !(lon.is_finite() && lat.is_finite()) {
                continue;
            }
            if seen.insert((lon.to_bits(), lat.to_bits())) {
                points.push([lon, lat]);
                samples.push(value);
            }
        }

        let (rows, cols) = mesh.shape();
        let Some(triangulation) = Triangulation::new(points) else {
            warn!(
                "only {} usable stations, station-to-grid result is all missing",
                samples.len()
            );
            return Grid::on_mesh(mesh, Array2::from_elem((rows, cols), f64::NAN));
        };

        let gradients = match self.method {
            InterpolationMethod::Cubic => triangulation.gradients(&samples),
            _ => Vec::new(),
        };

        let values = Array2::from_shape_fn((rows, cols), |(i, j)| {
            let p = [mesh.lon()[[i, j]], mesh.lat()[[i, j]]];
            let Some(location) = triangulation.locate(p) else {
                return f64::NAN;
            };
            match self.method {
                InterpolationMethod::Linear => location
                    .vertices
                    .iter()
                    .zip(location.weights)
                    .map(|(&v, w)| samples[v] * w)
                    .sum::<f64>(),
                InterpolationMethod::Nearest => {
                    samples[triangulation.nearest_vertex(p, &location)]
                }
                InterpolationMethod::Cubic => {
                    triangulation.cubic(&location, &samples, &gradients)
                }
            }
        });

        Grid::on_mesh(mesh, values)
    }

    /// Locate every station on the mesh once so several fields can be sampled cheaply.
    pub fn locate(&self, mesh: &Arc<Mesh>, lons: &[f64], lats: &[f64]) -> StationLocations {
        let (rows, cols) = mesh.shape();
        let hits = if rows < 2 || cols < 2 {
            vec![None; lons.len()]
        } else if let Some((dlon, dlat)) = mesh.regular_spacing() {
            let origin = [mesh.lon()[[0, 0]], mesh.lat()[[0, 0]]];
            lons.iter()
                .zip(lats)
                .map(|(&lon, &lat)| locate_regular(origin, (dlon, dlat), (rows, cols), lon, lat))
                .collect()
        } else {
            let index = CellIndex::build(mesh);
            lons.iter()
                .zip(lats)
                .map(|(&lon, &lat)| index.locate(mesh, lon, lat))
                .collect()
        };

        StationLocations {
            mesh: mesh.clone(),
            hits,
        }
    }

    /// Sample a grid at precomputed station locations. Missing results are `None`.
    pub fn sample(&self, grid: &Grid, locations: &StationLocations) -> Result<Vec<Option<f64>>> {
        if !locations.matches(grid.mesh()) {
            return Err(ProcessingError::InvalidGrid(
                "station locations were computed on a different mesh".to_string(),
            ));
        }

        let values = grid.values();
        Ok(locations
            .hits
            .iter()
            .map(|hit| {
                let hit = hit.as_ref()?;
                match self.method {
                    InterpolationMethod::Linear => linear(values, hit),
                    InterpolationMethod::Nearest => nearest(values, hit),
                    InterpolationMethod::Cubic => cubic(values, hit).or_else(|| linear(values, hit)),
                }
            })
            .collect())
    }

    pub fn grid_to_station(&self, grid: &Grid, lons: &[f64], lats: &[f64]) -> Result<Vec<Option<f64>>> {
        if lons.len() != lats.len() {
            return Err(ProcessingError::InvalidFormat(format!(
                "{} lons but {} lats",
                lons.len(),
                lats.len()
            )));
        }
        let locations = self.locate(grid.mesh(), lons, lats);
        self.sample(grid, &locations)
    }
}

/// Projects grids onto a fixed station list, reusing station locations per mesh.
#[derive(Debug)]
pub struct StationProjector {
    interpolator: SpatialInterpolator,
    lons: Vec<f64>,
    lats: Vec<f64>,
    cache: Mutex<Vec<Arc<StationLocations>>>,
}

impl StationProjector {
    pub fn new(interpolator: SpatialInterpolator, stations: &StationSet) -> Self {
        Self {
            interpolator,
            lons: stations.lons(),
            lats: stations.lats(),
            cache: Mutex::new(Vec::new()),
        }
    }

    pub fn interpolator(&self) -> &SpatialInterpolator {
        &self.interpolator
    }

    pub fn project(&self, grid: &Grid) -> Result<Vec<Option<f64>>> {
        let locations = self.locations(grid.mesh());
        self.interpolator.sample(grid, &locations)
    }

    fn locations(&self, mesh: &Arc<Mesh>) -> Arc<StationLocations> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(found) = cache.iter().find(|l| l.matches(mesh)) {
            return found.clone();
        }

        let located = Arc::new(self.interpolator.locate(mesh, &self.lons, &self.lats));
        debug!(
            "located {}/{} stations on a {:?} mesh",
            located.covered(),
            located.len(),
            mesh.shape()
        );
        if cache.len() >= LOCATION_CACHE_CAPACITY {
            cache.remove(0);
        }
        cache.push(located.clone());
        located
    }
}

/// Nearest grid node to a point, as `(row, col)` with row 0 the northernmost row.
///
/// Spacing comes from the first two columns and rows; indices are rounded half to even.
pub fn nearest_index(lon: f64, lat: f64, grid: &Grid) -> Result<(usize, usize)> {
    let (rows, cols) = grid.shape();
    if rows < 2 || cols < 2 {
        return Err(ProcessingError::InvalidGrid(format!(
            "nearest index needs at least a 2x2 grid, got {}x{}",
            rows, cols
        )));
    }

    let dlon = (grid.lon()[[0, 1]] - grid.lon()[[0, 0]]).abs();
    let dlat = (grid.lat()[[1, 0]] - grid.lat()[[0, 0]]).abs();
    if dlon == 0.0 || dlat == 0.0 {
        return Err(ProcessingError::InvalidGrid("zero grid spacing".to_string()));
    }

    if !lon.is_finite() || !lat.is_finite() {
        return Err(ProcessingError::InvalidGrid(format!(
            "cannot index point ({}, {})",
            lon, lat
        )));
    }

    // kept in f64 until bounds are known; far-away points would overflow i64
    let col = ((lon - grid.mesh().lon_min()) / dlon).round_ties_even();
    let row_from_south = ((lat - grid.mesh().lat_min()) / dlat).round_ties_even();
    let row = (rows - 1) as f64 - row_from_south;

    if row < 0.0 || row >= rows as f64 || col < 0.0 || col >= cols as f64 {
        return Err(ProcessingError::OutOfBoundsIndex {
            row: row as i64,
            col: col as i64,
            rows,
            cols,
        });
    }
    Ok((row as usize, col as usize))
}

fn locate_regular(
    origin: [f64; 2],
    (dlon, dlat): (f64, f64),
    (rows, cols): (usize, usize),
    lon: f64,
    lat: f64,
) -> Option<CellHit> {
    const EDGE_EPS: f64 = 1e-9;

    let fi = (origin[1] - lat) / dlat;
    let fj = (lon - origin[0]) / dlon;
    let last_row = (rows - 1) as f64;
    let last_col = (cols - 1) as f64;
    if !(fi >= -EDGE_EPS && fi <= last_row + EDGE_EPS && fj >= -EDGE_EPS && fj <= last_col + EDGE_EPS) {
        return None;
    }
    let fi = fi.clamp(0.0, last_row);
    let fj = fj.clamp(0.0, last_col);

    let i0 = (fi.floor() as usize).min(rows - 2);
    let j0 = (fj.floor() as usize).min(cols - 2);
    let t = fi - i0 as f64;
    let s = fj - j0 as f64;

    // Each cell is split along its NW-SE diagonal.
    let (corners, weights) = if s >= t {
        (
            [(i0, j0), (i0, j0 + 1), (i0 + 1, j0 + 1)],
            [1.0 - s, s - t, t],
        )
    } else {
        (
            [(i0, j0), (i0 + 1, j0), (i0 + 1, j0 + 1)],
            [1.0 - t, t - s, s],
        )
    };

    Some(CellHit {
        fi,
        fj,
        corners,
        weights,
    })
}

/// Bucket index of the cells of a curvilinear mesh.
struct CellIndex {
    min: [f64; 2],
    cell: [f64; 2],
    n: usize,
    buckets: Vec<Vec<(usize, usize)>>,
}

impl CellIndex {
    fn build(mesh: &Mesh) -> Self {
        let (rows, cols) = mesh.shape();
        let lon = mesh.lon();
        let lat = mesh.lat();

        let min = [mesh.lon_min(), mesh.lat_min()];
        let max = [
            lon.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            lat.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ];
        let cells = (rows - 1) * (cols - 1);
        let n = ((cells as f64).sqrt().ceil() as usize).clamp(1, 256);
        let cell = [
            ((max[0] - min[0]) / n as f64).max(f64::MIN_POSITIVE),
            ((max[1] - min[1]) / n as f64).max(f64::MIN_POSITIVE),
        ];

        let mut index = Self {
            min,
            cell,
            n,
            buckets: vec![Vec::new(); n * n],
        };

        for i in 0..rows - 1 {
            for j in 0..cols - 1 {
                let corners = [(i, j), (i, j + 1), (i + 1, j), (i + 1, j + 1)];
                let xs = corners.map(|c| lon[c]);
                let ys = corners.map(|c| lat[c]);
                let lo = index.bucket(
                    xs.iter().copied().fold(f64::INFINITY, f64::min),
                    ys.iter().copied().fold(f64::INFINITY, f64::min),
                );
                let hi = index.bucket(
                    xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                );
                for by in lo.1..=hi.1 {
                    for bx in lo.0..=hi.0 {
                        index.buckets[by * n + bx].push((i, j));
                    }
                }
            }
        }

        index
    }

    fn bucket(&self, x: f64, y: f64) -> (usize, usize) {
        let bx = ((x - self.min[0]) / self.cell[0]).floor().max(0.0) as usize;
        let by = ((y - self.min[1]) / self.cell[1]).floor().max(0.0) as usize;
        (bx.min(self.n - 1), by.min(self.n - 1))
    }

    fn locate(&self, mesh: &Mesh, lon: f64, lat: f64) -> Option<CellHit> {
        if !(lon.is_finite() && lat.is_finite()) || lon < self.min[0] || lat < self.min[1] {
            return None;
        }
        let (bx, by) = self.bucket(lon, lat);
        let node = |c: (usize, usize)| [mesh.lon()[c], mesh.lat()[c]];

        self.buckets[by * self.n + bx].iter().find_map(|&(i, j)| {
            let halves = [
                [(i, j), (i, j + 1), (i + 1, j + 1)],
                [(i, j), (i + 1, j), (i + 1, j + 1)],
            ];
            halves.into_iter().find_map(|corners| {
                let weights = barycentric([lon, lat], corners.map(node))?;
                let fi: f64 = corners.iter().zip(weights).map(|(c, w)| c.0 as f64 * w).sum();
                let fj: f64 = corners.iter().zip(weights).map(|(c, w)| c.1 as f64 * w).sum();
                Some(CellHit {
                    fi,
                    fj,
                    corners,
                    weights,
                })
            })
        })
    }
}

fn linear(values: &Array2<f64>, hit: &CellHit) -> Option<f64> {
    let mut total = 0.0;
    for (&corner, &w) in hit.corners.iter().zip(&hit.weights) {
        if w == 0.0 {
            continue;
        }
        let v = values[corner];
        if !v.is_finite() {
            return None;
        }
        total += w * v;
    }
    Some(total)
}

fn nearest(values: &Array2<f64>, hit: &CellHit) -> Option<f64> {
    let (rows, cols) = values.dim();
    let i = (hit.fi.round_ties_even().max(0.0) as usize).min(rows - 1);
    let j = (hit.fj.round_ties_even().max(0.0) as usize).min(cols - 1);
    Some(values[[i, j]]).filter(|v| v.is_finite())
}

fn keys_weight(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        (KEYS_A + 2.0) * x.powi(3) - (KEYS_A + 3.0) * x.powi(2) + 1.0
    } else if x < 2.0 {
        KEYS_A * x.powi(3) - 5.0 * KEYS_A * x.powi(2) + 8.0 * KEYS_A * x - 4.0 * KEYS_A
    } else {
        0.0
    }
}

/// Keys cubic convolution over the 4x4 neighbourhood, edges clamped.
/// `None` if any node in the stencil is missing.
fn cubic(values: &Array2<f64>, hit: &CellHit) -> Option<f64> {
    let (rows, cols) = values.dim();
    let i0 = (hit.fi.floor() as i64).min(rows as i64 - 2);
    let j0 = (hit.fj.floor() as i64).min(cols as i64 - 2);
    let t = hit.fi - i0 as f64;
    let s = hit.fj - j0 as f64;

    let mut total = 0.0;
    for m in -1..=2i64 {
        let wi = keys_weight(t - m as f64);
        if wi == 0.0 {
            continue;
        }
        let i = (i0 + m).clamp(0, rows as i64 - 1) as usize;
        for n in -1..=2i64 {
            let wj = keys_weight(s - n as f64);
            if wj == 0.0 {
                continue;
            }
            let j = (j0 + n).clamp(0, cols as i64 - 1) as usize;
            let v = values[[i, j]];
            if !v.is_finite() {
                return None;
            }
            total += wi * wj * v;
        }
    }
    Some(total)
}
