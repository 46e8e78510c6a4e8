/// Local observation hours (UTC+8) that line up with forecast leads
pub const SYNOPTIC_HOURS: [u32; 8] = [2, 5, 8, 11, 14, 17, 20, 23];

/// Local time is UTC+8
pub const LOCAL_UTC_OFFSET_HOURS: i64 = 8;

/// Shift applied before bucketing on the EC UTC basis (UTC offset plus one 3-hour step)
pub const EC_UTC_SHIFT_HOURS: i64 = 9;

/// SMS cycles start every 6 hours at 00/06/12/18 UTC
pub const SMS_CYCLE_INTERVAL_HOURS: u32 = 6;

/// Lagged snapshots are 3 hours apart
pub const LAG_STEP_HOURS: u32 = 3;

/// Lag windows produced by a full run
pub const DEFAULT_GAPS: [u32; 4] = [3, 6, 9, 12];

/// Hours summed into the 3-hour accumulations
pub const ACCUMULATION_HOURS: u32 = 3;

/// MICAPS writes 9999/999999 style sentinels for missing values
pub const MISSING_SENTINEL_THRESHOLD: f64 = 999_990.0;

/// Outlier defaults for hourly precipitation (mm)
pub const DEFAULT_MAX_HOURLY_PRECIP: f64 = 50.0;
pub const DEFAULT_MIN_HOURLY_PRECIP: f64 = 1.0;
pub const OUTLIER_MAX_ITERATIONS: usize = 32;

/// Default fusion region [lat_min, lat_max, lon_min, lon_max]
pub const DEFAULT_REGION: [f64; 4] = [30.0, 50.0, 105.0, 125.0];

/// File names and extensions
pub const STATIONS_FILE: &str = "stations.csv";
pub const OBSERVATION_EXTENSION: &str = "txt";
pub const SNAPSHOT_EXTENSION: &str = "csv";
pub const SMS_EXTENSION: &str = "nc";
pub const CONFIG_ENV_PREFIX: &str = "PRECIP_FUSION";

/// Processing defaults
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
