//! Calendar-aligned resampling of per-realization time series.
//!
//! Three layers, leaves first:
//!
//! - [`frequency`]: the closed [`Frequency`](frequency::Frequency) set and
//!   calendar-aligned sample-date generation.
//! - [`interpolate`]: pure backfill and clamped-linear kernels over sorted
//!   sample positions.
//! - [`resample`]: per-realization grid resampling and point sampling,
//!   branching on each vector's rate/cumulative classification.

pub mod frequency;
pub mod interpolate;
pub mod resample;

pub use frequency::{Frequency, ParseFrequencyError, normalized_sample_dates};
pub use interpolate::{
    backfill_at, interpolate_backfill, interpolate_linear_clamped, linear_clamped_at,
};
pub use resample::{
    ResampleError, ResampleResult, resample_realization_batch, sample_realization_at_date,
};
