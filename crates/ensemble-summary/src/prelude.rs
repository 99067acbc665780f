//! Wrapper prelude.
//!
//! The `ensemble-summary` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::resampling;
pub use crate::{
    Frequency, ImportDescriptor, ImportError, LazySummaryProvider, ProviderRegistry, QueryError,
    RegistryError, StorageKey, StoredSummaryProvider, SummaryProvider, SummaryTable, TableError,
    VectorClassification, VectorMetadata, VectorRange, storage_key_v1,
};
