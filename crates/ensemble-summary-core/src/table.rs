//! The merged, immutable summary table and its invariants.
//!
//! A [`SummaryTable`] wraps a single Arrow `RecordBatch` with the fixed
//! layout `DATE: Timestamp(ms) | REAL: Int32 | vector columns: Float32/64`.
//! Construction validates the structural invariants once — required columns,
//! no nulls, rows grouped by realization, strictly increasing unique dates
//! within each group — and builds a per-realization row-range index so query
//! paths can slice without rescanning.
//!
//! Realization id `-1` is reserved for "no realization" rows written by
//! sibling providers (observed/reference data). Such rows are tolerated and
//! indexed but excluded from [`SummaryTable::realizations`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;
use std::str::FromStr;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::metadata::{
    FREQUENCY_KEY, MetadataError, VECTOR_RANGES_KEY, VectorMetadata, VectorRange,
    decode_vector_ranges,
};
use crate::resampling::frequency::{Frequency, datetime_from_millis};

/// Name of the timestamp column, millisecond resolution, UTC.
pub const DATE_COLUMN: &str = "DATE";
/// Name of the realization id column.
pub const REAL_COLUMN: &str = "REAL";

/// Reserved realization id meaning "no realization".
pub const NO_REALIZATION: i32 = -1;

/// Result alias for summary-table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors raised while validating or reading a summary table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A required key column (`DATE` or `REAL`) is absent.
    #[snafu(display("Missing required column {column}"))]
    MissingRequiredColumn {
        /// Name of the missing column.
        column: String,
    },

    /// A key column exists but has the wrong Arrow type.
    #[snafu(display("Column {column} has unsupported type {datatype:?}"))]
    WrongColumnType {
        /// Name of the offending column.
        column: String,
        /// Arrow data type encountered.
        datatype: DataType,
    },

    /// A vector column is not of a supported floating-point type.
    #[snafu(display("Vector column {column} has unsupported type {datatype:?} (expected Float32 or Float64)"))]
    UnsupportedVectorType {
        /// Name of the offending vector column.
        column: String,
        /// Arrow data type encountered.
        datatype: DataType,
    },

    /// A column contains null values, which the format forbids.
    #[snafu(display("Column {column} contains nulls"))]
    NullsInColumn {
        /// Name of the offending column.
        column: String,
    },

    /// Rows of one realization appear in more than one contiguous run.
    #[snafu(display("Rows of realization {realization} are not grouped contiguously"))]
    RealizationNotGrouped {
        /// The realization whose rows are scattered.
        realization: i32,
    },

    /// Dates within one realization group are not strictly increasing.
    #[snafu(display("Dates of realization {realization} are not strictly increasing and unique"))]
    UnsortedDates {
        /// The realization with out-of-order or duplicate dates.
        realization: i32,
    },

    /// A realization id below the reserved `-1` was encountered.
    #[snafu(display("Invalid realization id {realization} (must be >= -1)"))]
    InvalidRealizationId {
        /// The out-of-range realization id.
        realization: i32,
    },

    /// A stored timestamp cannot be represented as a `DateTime<Utc>`.
    #[snafu(display("Timestamp {millis} ms is outside the representable date range"))]
    TimestampOutOfRange {
        /// The offending epoch-millisecond value.
        millis: i64,
    },

    /// Schema-level or field-level metadata failed to decode.
    #[snafu(display("Table metadata error: {source}"))]
    Metadata {
        /// Underlying metadata decode error.
        source: MetadataError,
    },
}

/// Extract a vector column into `f64` values, widening `Float32` as needed.
///
/// Returns `None` when the array is not a supported float type; callers that
/// validated the schema can treat that as unreachable.
pub(crate) fn vector_values_f64(array: &dyn Array) -> Option<Vec<f64>> {
    if let Some(arr) = array.as_any().downcast_ref::<Float64Array>() {
        Some(arr.values().to_vec())
    } else if let Some(arr) = array.as_any().downcast_ref::<Float32Array>() {
        Some(arr.values().iter().map(|v| f64::from(*v)).collect())
    } else {
        None
    }
}

/// Build an array of `datatype` from `f64` values, narrowing to `Float32`
/// when the original column was 32-bit.
pub(crate) fn float_array_from_f64(values: Vec<f64>, datatype: &DataType) -> Option<ArrayRef> {
    match datatype {
        DataType::Float64 => Some(std::sync::Arc::new(Float64Array::from(values))),
        DataType::Float32 => Some(std::sync::Arc::new(Float32Array::from_iter_values(
            values.into_iter().map(|v| v as f32),
        ))),
        _ => None,
    }
}

/// True when `datatype` is a supported vector column type.
pub(crate) fn is_vector_type(datatype: &DataType) -> bool {
    matches!(datatype, DataType::Float32 | DataType::Float64)
}

/// The Arrow type of the `DATE` column.
pub(crate) fn date_column_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, None)
}

/// A validated, immutable ensemble summary table.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    batch: RecordBatch,
    schema: SchemaRef,
    date_array: TimestampMillisecondArray,
    date_idx: usize,
    real_idx: usize,
    real_ranges: Vec<(i32, Range<usize>)>,
    vector_names: Vec<String>,
}

impl SummaryTable {
    /// Validate a record batch against the summary-table invariants and wrap
    /// it.
    ///
    /// The batch is taken as-is; no copies of the column data are made beyond
    /// cheap Arc clones of the key arrays.
    pub fn try_new(batch: RecordBatch) -> TableResult<Self> {
        let schema = batch.schema();

        let (date_idx, date_field) =
            schema
                .column_with_name(DATE_COLUMN)
                .context(MissingRequiredColumnSnafu {
                    column: DATE_COLUMN,
                })?;
        ensure!(
            *date_field.data_type() == date_column_type(),
            WrongColumnTypeSnafu {
                column: DATE_COLUMN,
                datatype: date_field.data_type().clone(),
            }
        );

        let (real_idx, real_field) =
            schema
                .column_with_name(REAL_COLUMN)
                .context(MissingRequiredColumnSnafu {
                    column: REAL_COLUMN,
                })?;
        ensure!(
            *real_field.data_type() == DataType::Int32,
            WrongColumnTypeSnafu {
                column: REAL_COLUMN,
                datatype: real_field.data_type().clone(),
            }
        );

        let mut vector_names = Vec::new();
        for (idx, field) in schema.fields().iter().enumerate() {
            if idx == date_idx || idx == real_idx {
                ensure!(
                    batch.column(idx).null_count() == 0,
                    NullsInColumnSnafu {
                        column: field.name().clone(),
                    }
                );
                continue;
            }
            ensure!(
                is_vector_type(field.data_type()),
                UnsupportedVectorTypeSnafu {
                    column: field.name().clone(),
                    datatype: field.data_type().clone(),
                }
            );
            ensure!(
                batch.column(idx).null_count() == 0,
                NullsInColumnSnafu {
                    column: field.name().clone(),
                }
            );
            vector_names.push(field.name().clone());
        }
        vector_names.sort();

        // Invariant checks over the key columns; downcasts cannot fail after
        // the type checks above.
        let date_array = batch
            .column(date_idx)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .cloned()
            .context(WrongColumnTypeSnafu {
                column: DATE_COLUMN,
                datatype: date_field.data_type().clone(),
            })?;
        let real_array = batch
            .column(real_idx)
            .as_any()
            .downcast_ref::<Int32Array>()
            .cloned()
            .context(WrongColumnTypeSnafu {
                column: REAL_COLUMN,
                datatype: real_field.data_type().clone(),
            })?;

        let real_values: &[i32] = real_array.values();
        let date_values: &[i64] = date_array.values();

        let mut real_ranges: Vec<(i32, Range<usize>)> = Vec::new();
        let mut seen: HashSet<i32> = HashSet::new();
        let n = batch.num_rows();
        let mut i = 0;
        while i < n {
            let id = real_values[i];
            ensure!(
                id >= NO_REALIZATION,
                InvalidRealizationIdSnafu { realization: id }
            );
            let start = i;
            while i < n && real_values[i] == id {
                i += 1;
            }
            ensure!(seen.insert(id), RealizationNotGroupedSnafu { realization: id });
            ensure!(
                date_values[start..i].windows(2).all(|w| w[0] < w[1]),
                UnsortedDatesSnafu { realization: id }
            );
            real_ranges.push((id, start..i));
        }

        Ok(SummaryTable {
            batch,
            schema,
            date_array,
            date_idx,
            real_idx,
            real_ranges,
            vector_names,
        })
    }

    /// The underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// The table schema, including field and schema metadata.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Total number of rows across all realizations.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column index of the `DATE` column.
    pub fn date_index(&self) -> usize {
        self.date_idx
    }

    /// Column index of the `REAL` column.
    pub fn real_index(&self) -> usize {
        self.real_idx
    }

    /// All vector column names, sorted, excluding `DATE` and `REAL`.
    pub fn vector_names(&self) -> &[String] {
        &self.vector_names
    }

    /// Distinct realization ids with `REAL >= 0`, sorted ascending.
    pub fn realizations(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .real_ranges
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id >= 0)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Row range of one realization, if present.
    pub fn realization_range(&self, realization: i32) -> Option<Range<usize>> {
        self.real_ranges
            .iter()
            .find(|(id, _)| *id == realization)
            .map(|(_, range)| range.clone())
    }

    /// Epoch-millisecond date values of the whole table.
    pub fn date_values(&self) -> &[i64] {
        self.date_array.values()
    }

    /// Distinct dates present, sorted ascending, optionally restricted to a
    /// set of realizations.
    ///
    /// Realizations absent from the table contribute nothing; an empty
    /// restriction yields an empty list.
    pub fn dates(&self, realizations: Option<&[i32]>) -> TableResult<Vec<DateTime<Utc>>> {
        let all = self.date_values();
        let mut distinct: BTreeSet<i64> = BTreeSet::new();
        match realizations {
            None => distinct.extend(all.iter().copied()),
            Some(ids) => {
                for id in ids {
                    if let Some(range) = self.realization_range(*id) {
                        distinct.extend(all[range].iter().copied());
                    }
                }
            }
        }
        distinct
            .into_iter()
            .map(|millis| {
                datetime_from_millis(millis).context(TimestampOutOfRangeSnafu { millis })
            })
            .collect()
    }

    /// Schema field of a vector column, with its column index.
    pub fn vector_field(&self, name: &str) -> Option<(usize, &Field)> {
        if name == DATE_COLUMN || name == REAL_COLUMN {
            return None;
        }
        self.schema.column_with_name(name)
    }

    /// Decoded metadata of a vector column, when present and well-formed.
    pub fn vector_metadata(&self, name: &str) -> Option<VectorMetadata> {
        let (_, field) = self.vector_field(name)?;
        VectorMetadata::from_field(field).ok()
    }

    /// The precomputed per-vector ranges from the schema metadata blob, if
    /// the table carries one.
    pub fn vector_ranges(&self) -> TableResult<Option<BTreeMap<String, VectorRange>>> {
        match self.schema.metadata().get(VECTOR_RANGES_KEY) {
            None => Ok(None),
            Some(blob) => decode_vector_ranges(blob).map(Some).context(MetadataSnafu),
        }
    }

    /// The locked resampling frequency recorded in the schema metadata, if
    /// this table was written pre-sampled.
    pub fn locked_frequency(&self) -> TableResult<Option<Frequency>> {
        match self.schema.metadata().get(FREQUENCY_KEY) {
            None => Ok(None),
            Some(token) => {
                let freq = Frequency::from_str(token)
                    .ok()
                    .context(crate::metadata::InvalidValueSnafu {
                        field: "<schema>",
                        key: FREQUENCY_KEY,
                        value: token.clone(),
                    })
                    .context(MetadataSnafu)?;
                Ok(Some(freq))
            }
        }
    }
}
