pub mod grid_store;
pub mod micaps_reader;
pub mod netcdf_reader;
pub mod observation_reader;
pub mod snapshot_reader;
pub mod station_reader;

pub use grid_store::{GridStore, MemoryGridStore, MicapsGridStore, NetcdfGridStore};
pub use micaps_reader::{MicapsHeader, MicapsReader};
pub use netcdf_reader::NetcdfReader;
pub use observation_reader::{observation_table, ObservationField, ObservationReader, ObservationRecord};
pub use snapshot_reader::SnapshotReader;
pub use station_reader::StationReader;
