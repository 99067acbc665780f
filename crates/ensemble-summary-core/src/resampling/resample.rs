//! Per-realization resampling onto calendar-aligned grids.
//!
//! Operates on *realization batches*: a `DATE` column plus vector columns
//! for a single realization, with no `REAL` column (the store and providers
//! attach `REAL` when merging). The grid is generated from the realization's
//! own `[min(DATE), max(DATE)]`, so different realizations of one ensemble
//! may legitimately resample onto different grids with different row counts.
//!
//! Per vector the interpolation branch follows the ingested classification:
//! rate vectors backfill with zero outside the realization's own simulated
//! horizon (a domain policy of the underlying simulators, preserved exactly,
//! not a general interpolation default), cumulative vectors interpolate
//! linearly with flat extrapolation.

use std::sync::Arc;

use arrow::array::{ArrayRef, TimestampMillisecondArray};
use arrow::datatypes::{FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use snafu::prelude::*;

use crate::metadata::{MetadataError, VectorClassification, VectorMetadata};
use crate::resampling::frequency::{Frequency, normalized_sample_dates_millis};
use crate::resampling::interpolate::{
    backfill_at, interpolate_backfill, interpolate_linear_clamped, linear_clamped_at,
};
use crate::table::{DATE_COLUMN, date_column_type, float_array_from_f64, vector_values_f64};

/// Fill value for rate vectors outside a realization's own date range.
pub const RATE_FILL: f64 = 0.0;

/// Result alias for resampling operations.
pub type ResampleResult<T> = Result<T, ResampleError>;

/// Errors raised while resampling a realization batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResampleError {
    /// The batch has no `DATE` column or it has the wrong type.
    #[snafu(display("Realization batch is missing a millisecond {DATE_COLUMN} column"))]
    MissingDateColumn,

    /// The batch has no rows, so no grid can be derived from it.
    #[snafu(display("Cannot resample an empty realization batch"))]
    EmptyRealization,

    /// A column is not a supported float vector type.
    #[snafu(display("Column {column} is not a supported float vector"))]
    NotAVector {
        /// Name of the offending column.
        column: String,
    },

    /// A vector is missing its classification, so no interpolation branch
    /// can be chosen.
    #[snafu(display("Cannot classify vector {column} for resampling: {source}"))]
    Unclassified {
        /// Name of the vector lacking usable metadata.
        column: String,
        /// Underlying metadata decode error.
        source: MetadataError,
    },

    /// The date range cannot be represented as calendar dates.
    #[snafu(display("Date range [{min_millis}, {max_millis}] ms is outside the representable calendar range"))]
    DateRangeOutOfRange {
        /// Smallest date of the realization, epoch milliseconds.
        min_millis: i64,
        /// Largest date of the realization, epoch milliseconds.
        max_millis: i64,
    },

    /// Rebuilding the resampled record batch failed.
    #[snafu(display("Arrow error while building resampled batch: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: arrow::error::ArrowError,
    },
}

struct RealizationView<'a> {
    date_index: usize,
    dates: &'a TimestampMillisecondArray,
    vector_indices: Vec<usize>,
}

fn view_of(batch: &RecordBatch) -> ResampleResult<RealizationView<'_>> {
    let schema = batch.schema_ref();
    let (date_index, date_field) = schema
        .column_with_name(DATE_COLUMN)
        .context(MissingDateColumnSnafu)?;
    ensure!(
        *date_field.data_type() == date_column_type(),
        MissingDateColumnSnafu
    );
    let dates = batch
        .column(date_index)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .context(MissingDateColumnSnafu)?;
    ensure!(batch.num_rows() > 0, EmptyRealizationSnafu);

    let vector_indices = (0..batch.num_columns())
        .filter(|idx| *idx != date_index)
        .collect();
    Ok(RealizationView {
        date_index,
        dates,
        vector_indices,
    })
}

fn classification_of(field: &FieldRef) -> ResampleResult<VectorClassification> {
    VectorMetadata::from_field(field)
        .map(|meta| meta.classification)
        .context(UnclassifiedSnafu {
            column: field.name().clone(),
        })
}

/// Resample one realization batch onto the calendar grid of `freq`.
///
/// The output batch has the same schema (fields, field metadata and schema
/// metadata) as the input; only the rows change. Vector columns keep their
/// input float width. Single-row realizations degenerate to constant output
/// over the covering grid point(s).
pub fn resample_realization_batch(
    batch: &RecordBatch,
    freq: Frequency,
) -> ResampleResult<RecordBatch> {
    let view = view_of(batch)?;
    let raw_dates: &[i64] = view.dates.values();
    debug_assert!(
        raw_dates.windows(2).all(|w| w[0] < w[1]),
        "realization dates must be strictly increasing"
    );

    let min_millis = raw_dates[0];
    let max_millis = raw_dates[raw_dates.len() - 1];
    let grid = normalized_sample_dates_millis(min_millis, max_millis, freq).context(
        DateRangeOutOfRangeSnafu {
            min_millis,
            max_millis,
        },
    )?;

    let schema = batch.schema();
    let mut columns: Vec<ArrayRef> =
        vec![Arc::new(TimestampMillisecondArray::from(grid.clone())) as ArrayRef];
    // Column order: DATE first in the view, then the vectors in input order.
    let mut fields: Vec<FieldRef> = vec![schema.field(view.date_index).clone().into()];

    for idx in view.vector_indices {
        let field = &schema.fields()[idx];
        let raw_values = vector_values_f64(batch.column(idx).as_ref()).context(NotAVectorSnafu {
            column: field.name().clone(),
        })?;
        let resampled = match classification_of(field)? {
            VectorClassification::Rate => {
                interpolate_backfill(&grid, raw_dates, &raw_values, RATE_FILL, RATE_FILL)
            }
            VectorClassification::Cumulative => {
                interpolate_linear_clamped(&grid, raw_dates, &raw_values)
            }
        };
        let array =
            float_array_from_f64(resampled, field.data_type()).context(NotAVectorSnafu {
                column: field.name().clone(),
            })?;
        columns.push(array);
        fields.push(field.clone());
    }

    let out_schema = Arc::new(Schema::new_with_metadata(
        fields,
        batch.schema_ref().metadata().clone(),
    ));
    RecordBatch::try_new(out_schema, columns).context(ArrowSnafu)
}

/// Point-sample one realization batch at an arbitrary date.
///
/// Returns one `f64` per vector column, in the batch's column order with
/// `DATE` skipped. The values are identical to what
/// [`resample_realization_batch`] would produce at `date_millis` if the grid
/// contained it: rate vectors are zero outside the realization's own range,
/// cumulative vectors clamp to the first/last raw value.
pub fn sample_realization_at_date(
    batch: &RecordBatch,
    date_millis: i64,
) -> ResampleResult<Vec<f64>> {
    let view = view_of(batch)?;
    let raw_dates: &[i64] = view.dates.values();
    let schema = batch.schema_ref();

    let mut out = Vec::with_capacity(view.vector_indices.len());
    for idx in view.vector_indices {
        let field = &schema.fields()[idx];
        let raw_values = vector_values_f64(batch.column(idx).as_ref()).context(NotAVectorSnafu {
            column: field.name().clone(),
        })?;
        let value = match classification_of(field)? {
            VectorClassification::Rate => {
                backfill_at(date_millis, raw_dates, &raw_values, RATE_FILL, RATE_FILL)
            }
            VectorClassification::Cumulative => {
                linear_clamped_at(date_millis, raw_dates, &raw_values)
            }
        };
        out.push(value);
    }
    Ok(out)
}
