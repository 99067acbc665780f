//! # ensemble-summary
//!
//! Ensemble time-series provider over content-addressed Parquet storage.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ensemble_summary::prelude::*;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Resampling namespace (wrapper-only).
pub mod resampling {
    pub use ensemble_summary_core::resampling::frequency::{Frequency, ParseFrequencyError};
    pub use ensemble_summary_core::resampling::interpolate::{
        interpolate_backfill, interpolate_linear_clamped,
    };
    pub use ensemble_summary_core::resampling::resample::{RATE_FILL, ResampleError};
}

pub use ensemble_summary_core::metadata::{VectorClassification, VectorMetadata, VectorRange};
pub use ensemble_summary_core::provider::{
    LazySummaryProvider, QueryError, StoredSummaryProvider, SummaryProvider,
};
pub use ensemble_summary_core::registry::{
    ImportDescriptor, ProviderRegistry, RegistryError, StorageKey, storage_key_v1,
};
pub use ensemble_summary_core::resampling::frequency::Frequency;
pub use ensemble_summary_core::store::{ImportError, load_backing_store, write_backing_store};
pub use ensemble_summary_core::table::{SummaryTable, TableError};
