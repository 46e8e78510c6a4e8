use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::{BoundingBox, ForecastReference, ForecastSystem, Grid, SourceKind};
use crate::readers::micaps_reader::MicapsReader;
use crate::readers::netcdf_reader::NetcdfReader;
use crate::utils::filename::forecast_identifier;

/// Source of decoded forecast grids, addressed by forecast reference and field.
///
/// `field` is the EC field directory (e.g. `TP/r3`) or the SMS variable name. Grids come
/// back north-first and, when the store has a region, cropped to it.
pub trait GridStore: Send + Sync {
    fn system(&self) -> ForecastSystem;

    /// Where the grid for `reference`/`field` lives.
    fn source_path(&self, reference: &ForecastReference, field: &str) -> PathBuf;

    fn exists(&self, reference: &ForecastReference, field: &str) -> bool {
        self.source_path(reference, field).is_file()
    }

    fn load(&self, reference: &ForecastReference, field: &str) -> Result<Grid>;

    /// Fail with `MissingSourceFile` unless the source is present.
    fn require(&self, reference: &ForecastReference, field: &str) -> Result<()> {
        if self.exists(reference, field) {
            Ok(())
        } else {
            Err(missing(self.source_path(reference, field), self.system()))
        }
    }
}

fn missing(path: PathBuf, system: ForecastSystem) -> ProcessingError {
    ProcessingError::MissingSourceFile {
        path,
        system: SourceKind::from(system),
    }
}

fn cropped(grid: Grid, region: Option<&BoundingBox>) -> Grid {
    match region {
        Some(bbox) => grid.crop(bbox),
        None => grid,
    }
}

/// EC diamond-4 files: `<root>/<field>/<YYMMDDHH.LLL>`.
pub struct MicapsGridStore {
    root: PathBuf,
    reader: MicapsReader,
    region: Option<BoundingBox>,
}

impl MicapsGridStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reader: MicapsReader::new(),
            region: None,
        }
    }

    pub fn with_reader(mut self, reader: MicapsReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_region(mut self, region: Option<BoundingBox>) -> Self {
        self.region = region;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl GridStore for MicapsGridStore {
    fn system(&self) -> ForecastSystem {
        ForecastSystem::Ec
    }

    fn source_path(&self, reference: &ForecastReference, field: &str) -> PathBuf {
        self.root.join(field).join(forecast_identifier(reference))
    }

    fn load(&self, reference: &ForecastReference, field: &str) -> Result<Grid> {
        let path = self.source_path(reference, field);
        if !path.is_file() {
            return Err(missing(path, self.system()));
        }
        debug!("reading EC {} from {}", field, path.display());
        let grid = self.reader.read_grid(&path)?;
        Ok(cropped(grid, self.region.as_ref()))
    }
}

/// SMS NetCDF files: `<dir>/<YYYYMMDDHH.LLL.nc>`, one file per lead holding every variable.
pub struct NetcdfGridStore {
    dir: PathBuf,
    reader: NetcdfReader,
    region: Option<BoundingBox>,
}

impl NetcdfGridStore {
    pub fn new(dir: impl Into<PathBuf>, reader: NetcdfReader) -> Self {
        Self {
            dir: dir.into(),
            reader,
            region: None,
        }
    }

    pub fn with_region(mut self, region: Option<BoundingBox>) -> Self {
        self.region = region;
        self
    }
}

impl GridStore for NetcdfGridStore {
    fn system(&self) -> ForecastSystem {
        ForecastSystem::Sms
    }

    fn source_path(&self, reference: &ForecastReference, _field: &str) -> PathBuf {
        self.dir.join(forecast_identifier(reference))
    }

    fn load(&self, reference: &ForecastReference, field: &str) -> Result<Grid> {
        let path = self.source_path(reference, field);
        if !path.is_file() {
            return Err(missing(path, self.system()));
        }
        debug!("reading SMS {} from {}", field, path.display());
        let grid = self
            .reader
            .read_variable(&path, field)
            .map_err(|e| e.in_input(&path))?;
        Ok(cropped(grid, self.region.as_ref()))
    }
}

/// Grids held in memory, keyed by file identifier and field. Used to drive the pipeline
/// without files, e.g. from tests or an upstream decoder.
pub struct MemoryGridStore {
    system: ForecastSystem,
    grids: RwLock<HashMap<(String, String), Grid>>,
}

impl MemoryGridStore {
    pub fn new(system: ForecastSystem) -> Self {
        Self {
            system,
            grids: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, reference: &ForecastReference, field: &str, grid: Grid) {
        let key = (forecast_identifier(reference), field.to_string());
        let mut grids = match self.grids.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        grids.insert(key, grid);
    }

    pub fn len(&self) -> usize {
        match self.grids.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GridStore for MemoryGridStore {
    fn system(&self) -> ForecastSystem {
        self.system
    }

    fn source_path(&self, reference: &ForecastReference, field: &str) -> PathBuf {
        PathBuf::from("memory")
            .join(field)
            .join(forecast_identifier(reference))
    }

    fn exists(&self, reference: &ForecastReference, field: &str) -> bool {
        let key = (forecast_identifier(reference), field.to_string());
        match self.grids.read() {
            Ok(guard) => guard.contains_key(&key),
            Err(poisoned) => poisoned.into_inner().contains_key(&key),
        }
    }

    fn load(&self, reference: &ForecastReference, field: &str) -> Result<Grid> {
        let key = (forecast_identifier(reference), field.to_string());
        let grids = match self.grids.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        grids
            .get(&key)
            .cloned()
            .ok_or_else(|| missing(self.source_path(reference, field), self.system))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;
    use std::fs;
    use tempfile::TempDir;

    fn ec_reference() -> ForecastReference {
        let cycle = NaiveDate::from_ymd_opt(2018, 8, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        ForecastReference::new(ForecastSystem::Ec, cycle, 3)
    }

    #[test]
    fn test_micaps_store_paths_and_missing_files() -> Result<()> {
        let dir = TempDir::new()?;
        let store = MicapsGridStore::new(dir.path());
        let reference = ec_reference();

        let path = store.source_path(&reference, "TP/r3");
        assert_eq!(path, dir.path().join("TP/r3/18080408.003"));
        assert!(!store.exists(&reference, "TP/r3"));
        assert!(matches!(
            store.load(&reference, "TP/r3"),
            Err(ProcessingError::MissingSourceFile {
                system: SourceKind::Ec,
                ..
            })
        ));
        assert!(store.require(&reference, "TP/r3").is_err());

        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(
            &path,
            "diamond 4 test\n18 08 04 08 3 0 1 1 110 112 30 32 3 3 1 0 50 1 0\n1 2 3\n4 5 6\n7 8 9\n",
        )?;
        let grid = store.load(&reference, "TP/r3")?;
        assert_eq!(grid.shape(), (3, 3));
        assert_eq!(grid.values()[[0, 0]], 7.0);
        Ok(())
    }

    #[test]
    fn test_region_crop_applied() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("2T/999/18080408.003");
        fs::create_dir_all(path.parent().unwrap())?;
        let values: Vec<String> = (0..36).map(|v| v.to_string()).collect();
        fs::write(
            &path,
            format!(
                "diamond 4 t2m\n18 08 04 08 3 0 1 1 100 105 30 35 6 6 1 0 50 1 0\n{}\n",
                values.join(" ")
            ),
        )?;

        let store = MicapsGridStore::new(dir.path())
            .with_region(Some(BoundingBox::new(32.0, 33.0, 102.0, 103.0)));
        let grid = store.load(&ec_reference(), "2T/999")?;
        assert_eq!(grid.shape(), (4, 4));
        Ok(())
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryGridStore::new(ForecastSystem::Ec);
        let reference = ec_reference();
        assert!(store.is_empty());

        let grid = Grid::new(
            array![[110.0, 111.0], [110.0, 111.0]],
            array![[31.0, 31.0], [30.0, 30.0]],
            array![[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap();
        store.insert(&reference, "TP/r3", grid);

        assert!(store.exists(&reference, "TP/r3"));
        assert!(!store.exists(&reference.with_lead(6), "TP/r3"));
        assert_eq!(store.load(&reference, "TP/r3").unwrap().values()[[1, 1]], 4.0);
        assert!(store.load(&reference, "CP/r3").is_err());
    }
}
