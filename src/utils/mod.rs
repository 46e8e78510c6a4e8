pub mod constants;
pub mod filename;
pub mod progress;

pub use constants::*;
pub use filename::{
    feature_table_path, forecast_identifier, observation_filename, snapshot_filename,
    snapshot_path,
};
pub use progress::ProgressReporter;
