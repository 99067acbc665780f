//! Core engine for ensemble summary data.
//!
//! An ensemble is a set of realizations, each carrying the same summary
//! vectors sampled on its own irregular date grid. This crate validates
//! per-realization Arrow tables, merges them into a single columnar
//! [`table::SummaryTable`], resamples rate and cumulative vectors onto
//! calendar grids, persists merged tables as content-addressed Parquet
//! artifacts and answers queries through the
//! [`provider::SummaryProvider`] trait.
//!
//! Two provider flavors cover the two access patterns:
//! [`provider::LazySummaryProvider`] keeps raw tables in memory and
//! resamples on read, while [`provider::StoredSummaryProvider`] serves a
//! persisted artifact whose grid was fixed at import time. The
//! [`registry::ProviderRegistry`] ties them together, fetching raw data
//! only when no artifact exists for an import descriptor.

#![deny(missing_docs)]

pub mod metadata;
pub mod provider;
pub mod registry;
pub mod resampling;
pub mod storage;
pub mod store;
pub mod table;

#[cfg(test)]
pub(crate) mod test_util;
