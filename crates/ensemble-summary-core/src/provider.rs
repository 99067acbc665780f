//! The query-facing provider surface.
//!
//! A provider is a lightweight, read-only wrapper created per query session;
//! it owns no mutable shared state and is safe to share across threads. Two
//! implementations cover the two storage strategies:
//!
//! - [`StoredSummaryProvider`]: wraps a loaded backing-store table; data is
//!   served as persisted, and for pre-sampled stores the resampling
//!   frequency is locked to what was written.
//! - [`LazySummaryProvider`]: wraps raw per-realization tables and resamples
//!   on demand, including point-sampling at dates that are not raw samples.
//!
//! Both answer the same [`SummaryProvider`] contract, so the serving layer
//! never needs to know which strategy backs an ensemble.

pub mod lazy;
pub mod stored;

use std::collections::BTreeMap;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::metadata::{VectorMetadata, VectorRange};
use crate::resampling::frequency::Frequency;
use crate::resampling::resample::ResampleError;
use crate::table::TableError;

pub use lazy::LazySummaryProvider;
pub use stored::StoredSummaryProvider;

/// Result alias for provider queries.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised by provider queries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// A requested vector name is absent from the provider's schema.
    #[snafu(display("Unknown vector {name}"))]
    UnknownVector {
        /// The unknown vector name.
        name: String,
    },

    /// An exact-date query missed the stored sample grid.
    #[snafu(display("Date {date} is not a member of the stored sample grid"))]
    DateNotFound {
        /// The date that is not on the grid.
        date: DateTime<Utc>,
    },

    /// A resampling frequency was requested of a provider that cannot honor
    /// it.
    #[snafu(display("Resampling to {requested} is not supported by this provider (locked frequency: {locked:?})"))]
    UnsupportedResampling {
        /// The frequency the caller asked for.
        requested: Frequency,
        /// The provider's locked frequency, when it has one.
        locked: Option<Frequency>,
    },

    /// A table-level failure while reading the backing data.
    #[snafu(display("Table error during query: {source}"))]
    Table {
        /// Underlying table error.
        source: TableError,
    },

    /// A resampling failure while materializing the result.
    #[snafu(display("Resampling error during query: {source}"))]
    Resample {
        /// Underlying resampling error.
        source: ResampleError,
    },

    /// Arrow failure while assembling the result batch.
    #[snafu(display("Arrow error during query: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// A stored timestamp cannot be represented as a calendar date.
    #[snafu(display("Realization {realization}: timestamp {millis} ms is outside the representable date range"))]
    TimestampOutOfRange {
        /// The realization holding the unrepresentable value.
        realization: i32,
        /// The offending epoch-millisecond value.
        millis: i64,
    },

    /// A realization table no longer satisfies the validated layout.
    ///
    /// Reaching this indicates a bug; construction validates every table.
    #[snafu(display("Realization {realization} table is malformed"))]
    MalformedRealization {
        /// The realization whose table is unusable.
        realization: i32,
    },
}

/// The read-only query contract every summary provider answers.
///
/// All operations are side-effect-free; result batches are freshly
/// allocated and never alias provider-internal buffers mutably.
pub trait SummaryProvider {
    /// All vector names, sorted, excluding the `DATE`/`REAL` key columns.
    fn vector_names(&self) -> Vec<String>;

    /// Vector names surviving value-based filtering, using only the
    /// precomputed per-vector ranges (no table scan).
    ///
    /// `exclude_all_zero` drops vectors whose min and max are both zero;
    /// `exclude_constant` drops vectors whose min equals max (any value).
    /// Both flags combine as the logical AND of survivors.
    fn vector_names_filtered_by_value(
        &self,
        exclude_all_zero: bool,
        exclude_constant: bool,
    ) -> Vec<String>;

    /// Distinct realization ids with `REAL >= 0`, sorted ascending.
    fn realizations(&self) -> Vec<i32>;

    /// Distinct dates present, sorted ascending, optionally restricted to
    /// the given realizations.
    ///
    /// For a frequency-locked provider this is the stored resampled grid;
    /// for a lazy provider it is the union of each realization's raw dates.
    fn dates(&self, realizations: Option<&[i32]>) -> QueryResult<Vec<DateTime<Utc>>>;

    /// Retrieve `DATE`, `REAL` and the named vectors, optionally restricted
    /// to realizations and resampled to `frequency`.
    ///
    /// Fails with [`QueryError::UnknownVector`] for unknown names and with
    /// [`QueryError::UnsupportedResampling`] when the provider cannot honor
    /// the requested frequency. An empty realization selection yields an
    /// empty batch.
    fn vectors(
        &self,
        vector_names: &[String],
        realizations: Option<&[i32]>,
        frequency: Option<Frequency>,
    ) -> QueryResult<RecordBatch>;

    /// Retrieve one row per selected realization at a single date, columns
    /// `REAL` plus the named vectors.
    ///
    /// A lazy provider point-samples at `date` even when it is not a raw
    /// sample; a frequency-locked provider requires exact grid membership
    /// and fails with [`QueryError::DateNotFound`] otherwise.
    fn vectors_at_date(
        &self,
        date: DateTime<Utc>,
        vector_names: &[String],
        realizations: Option<&[i32]>,
    ) -> QueryResult<RecordBatch>;

    /// Metadata of one vector, when present and well-formed.
    fn vector_metadata(&self, vector_name: &str) -> Option<VectorMetadata>;

    /// Whether this provider can resample to a caller-chosen frequency.
    fn supports_resampling(&self) -> bool;
}

/// Apply the value-based name filters over precomputed ranges.
///
/// Names without a recorded range are kept; filtering is conservative.
pub(crate) fn filter_names_by_range(
    names: &[String],
    ranges: &BTreeMap<String, VectorRange>,
    exclude_all_zero: bool,
    exclude_constant: bool,
) -> Vec<String> {
    names
        .iter()
        .filter(|name| match ranges.get(*name) {
            None => true,
            Some(range) => {
                !(exclude_all_zero && range.is_all_zero()
                    || exclude_constant && range.is_constant())
            }
        })
        .cloned()
        .collect()
}

/// Intersect the provider's available realizations with a caller filter.
///
/// `None` selects everything. The result keeps the available order (sorted
/// ascending) and silently drops filter entries absent from the provider.
pub(crate) fn select_realizations(available: Vec<i32>, filter: Option<&[i32]>) -> Vec<i32> {
    match filter {
        None => available,
        Some(wanted) => available
            .into_iter()
            .filter(|id| wanted.contains(id))
            .collect(),
    }
}
