//! Per-vector metadata and the schema-level metadata block.
//!
//! Every vector column in a summary table carries a [`VectorMetadata`] value,
//! encoded as plain string key/value pairs in the Arrow `Field` metadata so it
//! survives a Parquet round-trip unchanged. The metadata is fixed at ingestion
//! time and never re-derived afterwards; in particular the rate/cumulative
//! [`VectorClassification`] drives which interpolation branch the resampler
//! takes for that vector.
//!
//! Alongside the per-field entries, the Arrow *schema* metadata holds a small
//! JSON blob with the precomputed `(min, max)` range of every vector (see
//! [`VectorRange`]), the artifact format version, and — for pre-sampled
//! stores — the locked resampling frequency token.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use arrow::datatypes::Field;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Field metadata key holding the physical unit string (for example `SM3/DAY`).
pub const UNIT_KEY: &str = "unit";
/// Field metadata key holding the rate/cumulative classification token.
pub const CLASSIFICATION_KEY: &str = "classification";
/// Field metadata key flagging vectors that hold observed/history data.
pub const IS_HISTORICAL_KEY: &str = "is_historical";
/// Optional field metadata key with the originating simulator keyword.
pub const KEYWORD_KEY: &str = "keyword";
/// Optional field metadata key with the well or group name the vector belongs to.
pub const ENTITY_NAME_KEY: &str = "entity_name";
/// Optional field metadata key with the completion index within a well.
pub const COMPLETION_INDEX_KEY: &str = "completion_index";

/// Schema metadata key under which the per-vector range blob is stored.
pub const VECTOR_RANGES_KEY: &str = "ensemble_summary:vector_ranges";
/// Schema metadata key holding the locked resampling frequency of a
/// pre-sampled store, absent for raw stores.
pub const FREQUENCY_KEY: &str = "ensemble_summary:frequency";
/// Schema metadata key holding the artifact format version.
pub const FORMAT_VERSION_KEY: &str = "ensemble_summary:format_version";
/// Schema metadata key labelling which logical ensemble the rows came from.
pub const ENSEMBLE_KEY: &str = "ensemble_summary:ensemble";

/// Result alias for metadata encode/decode operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors from encoding or decoding vector/schema metadata entries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MetadataError {
    /// A required metadata key is absent from a vector field.
    #[snafu(display("Vector field {field} is missing required metadata key {key}"))]
    MissingKey {
        /// Name of the vector field.
        field: String,
        /// The metadata key that was not found.
        key: String,
    },

    /// A metadata value could not be parsed into its typed form.
    #[snafu(display("Invalid value {value} for metadata key {key} on field {field}"))]
    InvalidValue {
        /// Name of the vector field.
        field: String,
        /// The metadata key with the bad value.
        key: String,
        /// The raw string value that failed to parse.
        value: String,
    },

    /// The schema-level JSON blob failed to serialize or deserialize.
    #[snafu(display("Cannot decode schema metadata blob under {key}: {source}"))]
    RangesBlob {
        /// Schema metadata key of the offending blob.
        key: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Closed classification of a vector, fixed at ingestion.
///
/// The classification selects the resampling branch: `Rate` vectors use
/// right-continuous backfill interpolation and are defined as zero outside a
/// realization's own simulated horizon, `Cumulative` vectors use piecewise
/// linear interpolation clamped to the first/last raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorClassification {
    /// A per-interval rate quantity (for example a production rate).
    Rate,
    /// A cumulative or state quantity (for example total produced volume).
    Cumulative,
}

impl fmt::Display for VectorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorClassification::Rate => f.write_str("rate"),
            VectorClassification::Cumulative => f.write_str("cumulative"),
        }
    }
}

/// Error returned when a classification token is not `rate` or `cumulative`.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("Unknown vector classification token: {token}"))]
pub struct ParseClassificationError {
    /// The unrecognized token.
    pub token: String,
}

impl FromStr for VectorClassification {
    type Err = ParseClassificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate" => Ok(VectorClassification::Rate),
            "cumulative" => Ok(VectorClassification::Cumulative),
            other => Err(ParseClassificationError {
                token: other.to_string(),
            }),
        }
    }
}

/// Immutable per-vector metadata attached at ingestion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Physical unit of the vector values.
    pub unit: String,
    /// Rate/cumulative classification driving the interpolation policy.
    pub classification: VectorClassification,
    /// Whether the vector holds observed/history data rather than simulated.
    pub is_historical: bool,
    /// Originating simulator keyword, when known.
    pub keyword: Option<String>,
    /// Well or group name the vector belongs to, when applicable.
    pub entity_name: Option<String>,
    /// Completion index within a well, when applicable.
    pub completion_index: Option<i32>,
}

impl VectorMetadata {
    /// Encode into Arrow field metadata entries.
    ///
    /// Optional provenance fields are only emitted when present, so the
    /// round-trip through [`VectorMetadata::from_field`] is lossless.
    pub fn to_field_metadata(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(UNIT_KEY.to_string(), self.unit.clone());
        m.insert(
            CLASSIFICATION_KEY.to_string(),
            self.classification.to_string(),
        );
        m.insert(
            IS_HISTORICAL_KEY.to_string(),
            self.is_historical.to_string(),
        );
        if let Some(keyword) = &self.keyword {
            m.insert(KEYWORD_KEY.to_string(), keyword.clone());
        }
        if let Some(entity) = &self.entity_name {
            m.insert(ENTITY_NAME_KEY.to_string(), entity.clone());
        }
        if let Some(idx) = self.completion_index {
            m.insert(COMPLETION_INDEX_KEY.to_string(), idx.to_string());
        }
        m
    }

    /// Decode from the metadata entries of a vector field.
    ///
    /// `unit`, `classification` and `is_historical` are required; the
    /// provenance keys are optional.
    pub fn from_field(field: &Field) -> MetadataResult<Self> {
        let meta = field.metadata();
        let name = field.name();

        let unit = meta.get(UNIT_KEY).cloned().context(MissingKeySnafu {
            field: name.clone(),
            key: UNIT_KEY,
        })?;

        let class_token = meta
            .get(CLASSIFICATION_KEY)
            .cloned()
            .context(MissingKeySnafu {
                field: name.clone(),
                key: CLASSIFICATION_KEY,
            })?;
        let classification =
            VectorClassification::from_str(&class_token).ok().context(
                InvalidValueSnafu {
                    field: name.clone(),
                    key: CLASSIFICATION_KEY,
                    value: class_token,
                },
            )?;

        let hist_token = meta
            .get(IS_HISTORICAL_KEY)
            .cloned()
            .context(MissingKeySnafu {
                field: name.clone(),
                key: IS_HISTORICAL_KEY,
            })?;
        let is_historical = hist_token.parse::<bool>().ok().context(InvalidValueSnafu {
            field: name.clone(),
            key: IS_HISTORICAL_KEY,
            value: hist_token,
        })?;

        let completion_index = match meta.get(COMPLETION_INDEX_KEY) {
            None => None,
            Some(raw) => Some(raw.parse::<i32>().ok().context(InvalidValueSnafu {
                field: name.clone(),
                key: COMPLETION_INDEX_KEY,
                value: raw.clone(),
            })?),
        };

        Ok(VectorMetadata {
            unit,
            classification,
            is_historical,
            keyword: meta.get(KEYWORD_KEY).cloned(),
            entity_name: meta.get(ENTITY_NAME_KEY).cloned(),
            completion_index,
        })
    }
}

/// Precomputed `(min, max)` of a vector over all rows of all realizations.
///
/// Computed once at import time and stored in the schema metadata blob;
/// query-time filtering never rescans the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorRange {
    /// Smallest value observed across all realizations.
    pub min: f64,
    /// Largest value observed across all realizations.
    pub max: f64,
}

impl VectorRange {
    /// True when every observed value equals zero.
    pub fn is_all_zero(&self) -> bool {
        self.min == 0.0 && self.max == 0.0
    }

    /// True when every observed value is identical (any value, including zero).
    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }
}

/// Serialize a per-vector range map into the JSON blob stored under
/// [`VECTOR_RANGES_KEY`].
pub fn encode_vector_ranges(ranges: &BTreeMap<String, VectorRange>) -> MetadataResult<String> {
    serde_json::to_string(ranges).context(RangesBlobSnafu {
        key: VECTOR_RANGES_KEY,
    })
}

/// Deserialize the JSON blob stored under [`VECTOR_RANGES_KEY`].
pub fn decode_vector_ranges(blob: &str) -> MetadataResult<BTreeMap<String, VectorRange>> {
    serde_json::from_str(blob).context(RangesBlobSnafu {
        key: VECTOR_RANGES_KEY,
    })
}
