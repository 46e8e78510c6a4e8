pub mod batch_processor;
pub mod feature_composer;
pub mod interpolator;
pub mod outlier;
pub mod reconciler;
pub mod time_aligner;
pub mod time_series;
pub mod triangulation;

pub use batch_processor::{BatchFailure, BatchProcessor, BatchReport};
pub use feature_composer::FeatureComposer;
pub use interpolator::{nearest_index, InterpolationMethod, SpatialInterpolator, StationProjector};
pub use outlier::{OutlierConfig, OutlierCorrector, OutlierReport};
pub use reconciler::{ReconcileReport, StationReconciler};
pub use time_aligner::{Alignment, EcTimeBasis, TimeAligner};
pub use time_series::{window_lags, TimeSeriesAssembler};
