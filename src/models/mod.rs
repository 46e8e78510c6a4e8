pub mod forecast;
pub mod grid;
pub mod schema;
pub mod station;
pub mod table;

pub use forecast::{ForecastReference, ForecastSystem, ObservationTime, SourceKind};
pub use grid::{BoundingBox, Grid, Mesh};
pub use schema::{
    AccumulationFeature, EcFeature, EcField, EcSchema, FeatureSchema, ObservationSchema,
    SmsSchema,
};
pub use station::{Station, StationSet, IDENTITY_COLUMNS};
pub use table::{
    FeatureColumn, FeatureTable, StationColumns, StationRow, StationSnapshot, StationTable,
    TabularData,
};
