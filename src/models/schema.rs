use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ProcessingError, Result};
use crate::models::station::IDENTITY_COLUMNS;

/// Tag every feature column carries for the base timestamp; lagged copies swap it for `T-{lag}`.
pub const BASE_TAG: &str = "T-0";

/// Lag-qualified form of a base column name.
pub fn lag_column(column: &str, lag: u32) -> String {
    column.replacen(BASE_TAG, &format!("T-{}", lag), 1)
}

/// Column layout of every per-timestamp snapshot and the feature tables derived from it.
///
/// Loaded once (built in or from configuration) and validated before any file is touched,
/// so a renamed or missing column fails the run up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSchema {
    pub observation: ObservationSchema,
    pub ec: EcSchema,
    pub sms: SmsSchema,
    pub accumulations: Vec<AccumulationFeature>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            observation: ObservationSchema::default(),
            ec: EcSchema::default(),
            sms: SmsSchema::default(),
            accumulations: vec![
                AccumulationFeature::new("0_T-0_ECthin_TP-r3", "0_T-0_ECthin_TP-r6"),
                AccumulationFeature::new("0_T-0_SMS_ACC-r3", "0_T-0_SMS_ACC-r6"),
            ],
        }
    }
}

impl FeatureSchema {
    /// Feature columns of a snapshot in output order: observation, EC, SMS.
    pub fn snapshot_columns(&self) -> Vec<String> {
        let mut columns = self.observation.columns();
        columns.extend(self.ec.columns());
        columns.extend(self.sms.columns());
        columns
    }

    pub fn validate(&self) -> Result<()> {
        let columns = self.snapshot_columns();
        let mut seen: HashSet<&str> = IDENTITY_COLUMNS.iter().copied().collect();
        seen.insert("time");

        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(ProcessingError::Schema(format!(
                    "column '{}' is declared twice or shadows an identity column",
                    column
                )));
            }
            if column.matches(BASE_TAG).count() != 1 {
                return Err(ProcessingError::Schema(format!(
                    "column '{}' must carry exactly one '{}' tag",
                    column, BASE_TAG
                )));
            }
        }

        self.ec.validate()?;

        for accumulation in &self.accumulations {
            if !columns.iter().any(|c| c == &accumulation.source_column) {
                return Err(ProcessingError::Schema(format!(
                    "accumulation source '{}' is not a snapshot column",
                    accumulation.source_column
                )));
            }
            if accumulation.column.matches(BASE_TAG).count() != 1 {
                return Err(ProcessingError::Schema(format!(
                    "accumulation column '{}' must carry exactly one '{}' tag",
                    accumulation.column, BASE_TAG
                )));
            }
            if let Some(offset) = accumulation.offsets.iter().find(|o| *o % 3 != 0) {
                return Err(ProcessingError::Schema(format!(
                    "accumulation offset {} for '{}' is not a multiple of 3",
                    offset, accumulation.column
                )));
            }
        }

        Ok(())
    }
}

/// Output names for the observation part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationSchema {
    pub precipitation_r3: String,
    pub precipitation_r2: String,
    pub precipitation_r1: String,
    pub temperature: String,
    pub dew_point: String,
    pub relative_humidity: String,
    pub wind_max: String,
    pub wind_max_direction: String,
    pub wind_max_cos: String,
    pub wind_max_sin: String,
    pub wind_mean: String,
    pub wind_mean_direction: String,
    pub wind_mean_cos: String,
    pub wind_mean_sin: String,
}

impl Default for ObservationSchema {
    fn default() -> Self {
        Self {
            precipitation_r3: "0_T-0_surface_r3-p".to_string(),
            precipitation_r2: "0_T-0_surface_r2-p".to_string(),
            precipitation_r1: "0_T-0_surface_r1-p".to_string(),
            temperature: "3_T-0_surface_plot-T".to_string(),
            dew_point: "1_T-0_surface_plot-Td".to_string(),
            relative_humidity: "1_T-0_surface_plot-RH".to_string(),
            wind_max: "2_T-0_surface_plot-wind-max".to_string(),
            wind_max_direction: "2_T-0_surface_plot-wind-max-dir".to_string(),
            wind_max_cos: "2_T-0_surface_plot-cos(wind-max-dir)".to_string(),
            wind_max_sin: "2_T-0_surface_plot-sin(wind-max-dir)".to_string(),
            wind_mean: "2_T-0_surface_plot-wind-mean".to_string(),
            wind_mean_direction: "2_T-0_surface_plot-wind-mean-dir".to_string(),
            wind_mean_cos: "2_T-0_surface_plot-cos(wind-mean-dir)".to_string(),
            wind_mean_sin: "2_T-0_surface_plot-sin(wind-mean-dir)".to_string(),
        }
    }
}

impl ObservationSchema {
    pub fn columns(&self) -> Vec<String> {
        vec![
            self.precipitation_r3.clone(),
            self.precipitation_r2.clone(),
            self.precipitation_r1.clone(),
            self.temperature.clone(),
            self.dew_point.clone(),
            self.relative_humidity.clone(),
            self.wind_max.clone(),
            self.wind_max_direction.clone(),
            self.wind_max_cos.clone(),
            self.wind_max_sin.clone(),
            self.wind_mean.clone(),
            self.wind_mean_direction.clone(),
            self.wind_mean_cos.clone(),
            self.wind_mean_sin.clone(),
        ]
    }
}

/// One EC input field: a logical key and its directory under the EC root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcField {
    pub key: String,
    pub path: String,
}

/// One EC output column, either a field passed through or a rule over several fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EcFeature {
    Field { column: String, key: String },
    Mean { column: String, keys: Vec<String> },
    Max { column: String, keys: Vec<String> },
    /// `v / |w|`: positive for a southerly component.
    WindCos { column: String, u: String, v: String },
    /// `u / |w|`: positive for a westerly component.
    WindSin { column: String, u: String, v: String },
    Difference {
        column: String,
        minuend: String,
        subtrahend: String,
    },
}

impl EcFeature {
    pub fn column(&self) -> &str {
        match self {
            EcFeature::Field { column, .. }
            | EcFeature::Mean { column, .. }
            | EcFeature::Max { column, .. }
            | EcFeature::WindCos { column, .. }
            | EcFeature::WindSin { column, .. }
            | EcFeature::Difference { column, .. } => column,
        }
    }

    /// Field keys this feature reads.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            EcFeature::Field { key, .. } => vec![key.as_str()],
            EcFeature::Mean { keys, .. } | EcFeature::Max { keys, .. } => {
                keys.iter().map(String::as_str).collect()
            }
            EcFeature::WindCos { u, v, .. } | EcFeature::WindSin { u, v, .. } => {
                vec![u.as_str(), v.as_str()]
            }
            EcFeature::Difference {
                minuend,
                subtrahend,
                ..
            } => vec![minuend.as_str(), subtrahend.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcSchema {
    pub fields: Vec<EcField>,
    pub features: Vec<EcFeature>,
}

impl EcSchema {
    pub fn columns(&self) -> Vec<String> {
        self.features.iter().map(|f| f.column().to_string()).collect()
    }

    pub fn field(&self, key: &str) -> Option<&EcField> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Position of a field key in `fields`.
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.key == key)
    }

    fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for field in &self.fields {
            if field.path.trim().is_empty() {
                return Err(ProcessingError::Schema(format!(
                    "EC field '{}' has an empty path",
                    field.key
                )));
            }
            if !keys.insert(field.key.as_str()) {
                return Err(ProcessingError::Schema(format!(
                    "EC field key '{}' is declared twice",
                    field.key
                )));
            }
        }

        for feature in &self.features {
            let referenced = feature.keys();
            if referenced.is_empty() {
                return Err(ProcessingError::Schema(format!(
                    "EC feature '{}' references no fields",
                    feature.column()
                )));
            }
            if let Some(missing) = referenced.iter().find(|k| !keys.contains(*k)) {
                return Err(ProcessingError::Schema(format!(
                    "EC feature '{}' references unknown field '{}'",
                    feature.column(),
                    missing
                )));
            }
        }

        Ok(())
    }
}

impl Default for EcSchema {
    /// Surface precipitation and moisture, 850/700/500 hPa vertical velocity, winds on eight
    /// pressure levels reduced to level means/maxima and 500/850/925 hPa direction, and
    /// pseudo-equivalent potential temperature with its 500-850 hPa difference.
    fn default() -> Self {
        const WIND_LEVELS: [u32; 8] = [1000, 925, 850, 700, 600, 500, 400, 300];
        const LOW_LEVELS: [u32; 4] = [1000, 925, 850, 700];

        let mut fields = vec![
            ec_field("tp_r3", "TP/r3"),
            ec_field("cp_r3", "CP/r3"),
            ec_field("t2m", "2T/999"),
            ec_field("td2m", "2D/999"),
            ec_field("pw", "physic/pw"),
            ec_field("ki", "physic/ki"),
            ec_field("r850", "R/850"),
            ec_field("r700", "R/700"),
            ec_field("w850", "W/850"),
            ec_field("w700", "W/700"),
            ec_field("w500", "W/500"),
            ec_field("q850", "Q/850"),
            ec_field("q700", "Q/700"),
        ];
        for level in WIND_LEVELS {
            fields.push(ec_field(&format!("u{}", level), &format!("U/{}", level)));
        }
        for level in WIND_LEVELS {
            fields.push(ec_field(&format!("v{}", level), &format!("V/{}", level)));
        }
        for level in [850, 700, 500] {
            fields.push(ec_field(&format!("se{}", level), &format!("SE/{}", level)));
        }

        let keys = |prefix: &str, levels: &[u32]| -> Vec<String> {
            levels.iter().map(|l| format!("{}{}", prefix, l)).collect()
        };

        let mut features = vec![
            pass("0_T-0_ECthin_TP-r3", "tp_r3"),
            pass("0_T-0_ECthin_CP-r3", "cp_r3"),
            pass("3_T-0_ECthin_2T", "t2m"),
            pass("1_T-0_ECthin_2D", "td2m"),
            pass("1_T-0_ECthin_PW", "pw"),
            pass("3_T-0_ECthin_KI", "ki"),
            pass("1_T-0_ECthin_R-850", "r850"),
            pass("1_T-0_ECthin_R-700", "r700"),
            pass("2_T-0_ECthin_W-850", "w850"),
            pass("2_T-0_ECthin_W-700", "w700"),
            pass("2_T-0_ECthin_W-500", "w500"),
            EcFeature::Mean {
                column: "2_T-0_ECthin_W-mean(850-500)".to_string(),
                keys: keys("w", &[850, 700, 500]),
            },
            pass("1_T-0_ECthin_Q-850", "q850"),
            pass("1_T-0_ECthin_Q-700", "q700"),
            EcFeature::Mean {
                column: "2_T-0_ECthin_U-mean(1000-700)".to_string(),
                keys: keys("u", &LOW_LEVELS),
            },
            EcFeature::Mean {
                column: "2_T-0_ECthin_V-mean(1000-700)".to_string(),
                keys: keys("v", &LOW_LEVELS),
            },
            EcFeature::Mean {
                column: "2_T-0_ECthin_U-mean(1000-300)".to_string(),
                keys: keys("u", &WIND_LEVELS),
            },
            EcFeature::Max {
                column: "2_T-0_ECthin_U-max(1000-300)".to_string(),
                keys: keys("u", &WIND_LEVELS),
            },
            EcFeature::Mean {
                column: "2_T-0_ECthin_V-mean(1000-300)".to_string(),
                keys: keys("v", &WIND_LEVELS),
            },
            EcFeature::Max {
                column: "2_T-0_ECthin_V-max(1000-300)".to_string(),
                keys: keys("v", &WIND_LEVELS),
            },
        ];
        for level in [500, 850, 925] {
            let u = format!("u{}", level);
            let v = format!("v{}", level);
            features.push(pass(&format!("2_T-0_ECthin_U-{}", level), &u));
            features.push(pass(&format!("2_T-0_ECthin_V-{}", level), &v));
            features.push(EcFeature::WindCos {
                column: format!("2_T-0_ECthin_cos(wind-{})", level),
                u: u.clone(),
                v: v.clone(),
            });
            features.push(EcFeature::WindSin {
                column: format!("2_T-0_ECthin_sin(wind-{})", level),
                u,
                v,
            });
        }
        features.extend([
            pass("3_T-0_ECthin_SE-850", "se850"),
            pass("3_T-0_ECthin_SE-700", "se700"),
            pass("3_T-0_ECthin_SE-500", "se500"),
            EcFeature::Difference {
                column: "3_T-0_ECthin_SE-diff(500-850)".to_string(),
                minuend: "se500".to_string(),
                subtrahend: "se850".to_string(),
            },
        ]);

        Self { fields, features }
    }
}

fn ec_field(key: &str, path: &str) -> EcField {
    EcField {
        key: key.to_string(),
        path: path.to_string(),
    }
}

fn pass(column: &str, key: &str) -> EcFeature {
    EcFeature::Field {
        column: column.to_string(),
        key: key.to_string(),
    }
}

/// Hourly accumulated precipitation and the columns its 3/2/1-hour sums go to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsPrecipitation {
    pub variable: String,
    pub r3_column: String,
    pub r2_column: String,
    pub r1_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsVariable {
    pub variable: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsSchema {
    pub lon_variable: String,
    pub lat_variable: String,
    pub precipitation: SmsPrecipitation,
    pub variables: Vec<SmsVariable>,
}

impl SmsSchema {
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            self.precipitation.r3_column.clone(),
            self.precipitation.r2_column.clone(),
            self.precipitation.r1_column.clone(),
        ];
        columns.extend(self.variables.iter().map(|v| v.column.clone()));
        columns
    }
}

impl Default for SmsSchema {
    fn default() -> Self {
        let variable = |variable: &str, column: &str| SmsVariable {
            variable: variable.to_string(),
            column: column.to_string(),
        };

        Self {
            lon_variable: "ELON_P0_L1_GLC0".to_string(),
            lat_variable: "NLAT_P0_L1_GLC0".to_string(),
            precipitation: SmsPrecipitation {
                variable: "APCP_P8_L1_GLC0_acc".to_string(),
                r3_column: "0_T-0_SMS_ACC-r3".to_string(),
                r2_column: "0_T-0_SMS_ACC-r2".to_string(),
                r1_column: "0_T-0_SMS_ACC-r1".to_string(),
            },
            variables: vec![
                variable("DPT_P0_L103_GLC0", "1_T-0_SMS_DPT-P0-L103-GLC0"),
                variable("TMP_P0_L103_GLC0", "3_T-0_SMS_TMP-PO-L103-GLC0"),
                variable("RH_P0_L103_GLC0", "1_T-0_SMS_RH-P0-L103-GLC0"),
                variable("UGRD_P0_L103_GLC0", "2_T-0_SMS_UGRD-P0-L103-GLC0"),
                variable("VGRD_P0_L103_GLC0", "2_T-0_SMS_VGRD-P0-L103-GLC0"),
                variable("PRES_P0_L101_GLC0", "5_T-0_SMS_PRES-L101-GLC0"),
                variable("CAPE_P0_L1_GLC0", "3_T-0_SMS_CAPE-P0-L1-GLC0"),
                variable("CIN_P0_L1_GLC0", "3_T-0_SMS_CIN-P0-L1-GLC0"),
                variable("REFC_P0_L10_GLC0", "3_T-0_SMS_REFC-P0-L10-GLC0"),
            ],
        }
    }
}

/// A 6-hour accumulation built from two consecutive 3-hour columns.
///
/// For each offset `k` the output `column` tagged `T-k` is the sum of `source_column`
/// tagged `T-k` and tagged `T-(k+3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulationFeature {
    pub source_column: String,
    pub column: String,
    #[serde(default = "default_offsets")]
    pub offsets: Vec<u32>,
}

fn default_offsets() -> Vec<u32> {
    vec![0, 6]
}

impl AccumulationFeature {
    pub fn new(source_column: &str, column: &str) -> Self {
        Self {
            source_column: source_column.to_string(),
            column: column.to_string(),
            offsets: default_offsets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_is_valid() {
        let schema = FeatureSchema::default();
        schema.validate().unwrap();

        let columns = schema.snapshot_columns();
        assert_eq!(columns[0], "0_T-0_surface_r3-p");
        assert!(columns.contains(&"0_T-0_ECthin_TP-r3".to_string()));
        assert!(columns.contains(&"0_T-0_SMS_ACC-r3".to_string()));
        // 14 observation, 36 EC, 12 SMS
        assert_eq!(columns.len(), 14 + 36 + 12);
    }

    #[test]
    fn test_lag_column_rewrites_single_tag() {
        assert_eq!(lag_column("0_T-0_ECthin_TP-r3", 12), "0_T-12_ECthin_TP-r3");
        assert_eq!(
            lag_column("2_T-0_surface_plot-cos(wind-max-dir)", 3),
            "2_T-3_surface_plot-cos(wind-max-dir)"
        );
    }

    #[test]
    fn test_unknown_field_reference_rejected() {
        let mut schema = FeatureSchema::default();
        schema.ec.features.push(EcFeature::Mean {
            column: "2_T-0_ECthin_W-mean(925)".to_string(),
            keys: vec!["w925".to_string()],
        });
        assert!(matches!(schema.validate(), Err(ProcessingError::Schema(_))));
    }

    #[test]
    fn test_column_without_tag_rejected() {
        let mut schema = FeatureSchema::default();
        schema.sms.variables[0].column = "SMS_DPT".to_string();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut schema = FeatureSchema::default();
        schema.observation.dew_point = schema.observation.temperature.clone();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_schema_deserializes_tagged_features() {
        let json = r#"{
            "fields": [{"key": "u850", "path": "U/850"}, {"key": "v850", "path": "V/850"}],
            "features": [
                {"kind": "field", "column": "2_T-0_ECthin_U-850", "key": "u850"},
                {"kind": "wind_cos", "column": "2_T-0_ECthin_cos(wind-850)", "u": "u850", "v": "v850"}
            ]
        }"#;
        let ec: EcSchema = serde_json::from_str(json).unwrap();
        assert_eq!(ec.columns().len(), 2);
        assert_eq!(ec.features[1].keys(), vec!["u850", "v850"]);
        assert_eq!(ec.field_index("v850"), Some(1));
    }
}
