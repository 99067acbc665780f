//! Provider over a loaded backing-store table.
//!
//! Serves data exactly as persisted. For a pre-sampled store the sample
//! grid is frozen at import time, so the only acceptable `frequency`
//! argument is the locked one (or none); exact-date queries must hit the
//! stored grid. Raw stores (no locked frequency) reject every resampling
//! request — resample-on-read is the lazy provider's job.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, UInt32Array};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::metadata::{VectorMetadata, VectorRange};
use crate::provider::{
    ArrowSnafu, DateNotFoundSnafu, QueryResult, SummaryProvider, TableSnafu, UnknownVectorSnafu,
    UnsupportedResamplingSnafu, filter_names_by_range, select_realizations,
};
use crate::resampling::frequency::{Frequency, millis_from_datetime};
use crate::store::ImportResult;
use crate::table::{REAL_COLUMN, SummaryTable, vector_values_f64};

/// Read-only provider over a loaded, immutable [`SummaryTable`].
#[derive(Debug, Clone)]
pub struct StoredSummaryProvider {
    table: SummaryTable,
    ranges: BTreeMap<String, VectorRange>,
    locked: Option<Frequency>,
}

impl StoredSummaryProvider {
    /// Wrap a loaded summary table.
    ///
    /// The locked frequency and precomputed ranges are read from the
    /// table's schema metadata. Tables without a range blob (hand-built,
    /// not store-written) get their ranges computed here, once.
    pub fn new(table: SummaryTable) -> ImportResult<Self> {
        let locked = table
            .locked_frequency()
            .context(crate::store::TableSnafu)?;
        let ranges = match table.vector_ranges().context(crate::store::TableSnafu)? {
            Some(ranges) => ranges,
            None => {
                log::warn!("summary table carries no precomputed ranges; scanning once");
                scan_ranges(&table)?
            }
        };
        Ok(StoredSummaryProvider {
            table,
            ranges,
            locked,
        })
    }

    /// The wrapped table.
    pub fn table(&self) -> &SummaryTable {
        &self.table
    }

    /// The frequency this store was pre-sampled to, if any.
    pub fn locked_frequency(&self) -> Option<Frequency> {
        self.locked
    }

    /// Column indices for `DATE`, `REAL` and the requested vectors, in
    /// output order.
    fn projection_indices(&self, vector_names: &[String]) -> QueryResult<Vec<usize>> {
        let mut indices = vec![self.table.date_index(), self.table.real_index()];
        for name in vector_names {
            let (idx, _) = self
                .table
                .vector_field(name)
                .context(UnknownVectorSnafu { name: name.clone() })?;
            indices.push(idx);
        }
        Ok(indices)
    }
}

/// Compute per-vector ranges by scanning a merged table once.
fn scan_ranges(table: &SummaryTable) -> ImportResult<BTreeMap<String, VectorRange>> {
    let mut ranges = BTreeMap::new();
    for name in table.vector_names() {
        let (idx, field) = table.vector_field(name).context(
            crate::store::MissingRequiredColumnSnafu {
                realization: -1_i32,
                column: name.clone(),
            },
        )?;
        let values = vector_values_f64(table.batch().column(idx).as_ref()).context(
            crate::store::WrongColumnTypeSnafu {
                realization: -1_i32,
                column: name.clone(),
                datatype: field.data_type().clone(),
            },
        )?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            min = min.min(v);
            max = max.max(v);
        }
        ranges.insert(name.clone(), VectorRange { min, max });
    }
    Ok(ranges)
}

impl SummaryProvider for StoredSummaryProvider {
    fn vector_names(&self) -> Vec<String> {
        self.table.vector_names().to_vec()
    }

    fn vector_names_filtered_by_value(
        &self,
        exclude_all_zero: bool,
        exclude_constant: bool,
    ) -> Vec<String> {
        filter_names_by_range(
            self.table.vector_names(),
            &self.ranges,
            exclude_all_zero,
            exclude_constant,
        )
    }

    fn realizations(&self) -> Vec<i32> {
        self.table.realizations()
    }

    fn dates(&self, realizations: Option<&[i32]>) -> QueryResult<Vec<DateTime<Utc>>> {
        self.table.dates(realizations).context(TableSnafu)
    }

    fn vectors(
        &self,
        vector_names: &[String],
        realizations: Option<&[i32]>,
        frequency: Option<Frequency>,
    ) -> QueryResult<RecordBatch> {
        let indices = self.projection_indices(vector_names)?;

        // A locked store serves its own grid; anything else is a resample
        // request this provider cannot honor.
        if let Some(requested) = frequency {
            ensure!(
                self.locked == Some(requested),
                UnsupportedResamplingSnafu {
                    requested,
                    locked: self.locked,
                }
            );
        }

        let projected = self.table.batch().project(&indices).context(ArrowSnafu)?;
        match realizations {
            None => Ok(projected),
            Some(filter) => {
                let selected = select_realizations(self.table.realizations(), Some(filter));
                if selected.is_empty() {
                    return Ok(RecordBatch::new_empty(projected.schema()));
                }
                let slices: Vec<RecordBatch> = selected
                    .iter()
                    .filter_map(|id| self.table.realization_range(*id))
                    .map(|range| projected.slice(range.start, range.len()))
                    .collect();
                concat_batches(&projected.schema(), &slices).context(ArrowSnafu)
            }
        }
    }

    fn vectors_at_date(
        &self,
        date: DateTime<Utc>,
        vector_names: &[String],
        realizations: Option<&[i32]>,
    ) -> QueryResult<RecordBatch> {
        // Validate names up front so unknown vectors fail uniformly.
        let indices = self.projection_indices(vector_names)?;
        let vector_indices = &indices[2..];

        let mut fields: Vec<FieldRef> =
            vec![Arc::new(Field::new(REAL_COLUMN, DataType::Int32, false))];
        for idx in vector_indices {
            fields.push(self.table.schema().fields()[*idx].clone());
        }
        let schema = Arc::new(Schema::new(fields));

        let selected = select_realizations(self.table.realizations(), realizations);
        if selected.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }

        let date_millis = millis_from_datetime(date);
        let all_dates = self.table.date_values();
        let mut matched_reals: Vec<i32> = Vec::new();
        let mut matched_rows: Vec<u32> = Vec::new();
        for id in &selected {
            let Some(range) = self.table.realization_range(*id) else {
                continue;
            };
            if let Ok(offset) = all_dates[range.clone()].binary_search(&date_millis) {
                matched_reals.push(*id);
                matched_rows.push((range.start + offset) as u32);
            }
        }
        ensure!(!matched_rows.is_empty(), DateNotFoundSnafu { date });

        let row_indices = UInt32Array::from(matched_rows);
        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(matched_reals))];
        for idx in vector_indices {
            let taken = take(self.table.batch().column(*idx).as_ref(), &row_indices, None)
                .context(ArrowSnafu)?;
            columns.push(taken);
        }
        RecordBatch::try_new(schema, columns).context(ArrowSnafu)
    }

    fn vector_metadata(&self, vector_name: &str) -> Option<VectorMetadata> {
        self.table.vector_metadata(vector_name)
    }

    fn supports_resampling(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::QueryError;
    use crate::registry::StorageKey;
    use crate::store::{load_backing_store, write_backing_store};
    use crate::test_util::{TestResult, sample_ensemble};
    use arrow::array::Float64Array;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn utc_day(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    fn stored_provider(frequency: Option<Frequency>) -> StoredSummaryProvider {
        let tmp = TempDir::new().unwrap();
        let key = StorageKey::from_raw("ens-stored-test");
        let tables = match frequency {
            None => sample_ensemble(),
            Some(freq) => sample_ensemble()
                .into_iter()
                .map(|(real, batch)| {
                    let resampled =
                        crate::resampling::resample_realization_batch(&batch, freq).unwrap();
                    (real, resampled)
                })
                .collect(),
        };
        write_backing_store(tmp.path(), &key, &tables, frequency).unwrap();
        let table = load_backing_store(tmp.path(), &key).unwrap().unwrap();
        StoredSummaryProvider::new(table).unwrap()
    }

    #[test]
    fn exposes_names_realizations_and_filtering() {
        let provider = stored_provider(None);

        assert_eq!(provider.vector_names(), vec!["A", "C", "Z"]);
        assert_eq!(provider.realizations(), vec![0, 2]);
        assert_eq!(
            provider.vector_names_filtered_by_value(false, true),
            vec!["A"]
        );
        assert_eq!(
            provider.vector_names_filtered_by_value(true, false),
            vec!["A", "C"]
        );
        assert!(!provider.supports_resampling());
    }

    #[test]
    fn vectors_rejects_unknown_names() {
        let provider = stored_provider(None);
        let err = provider
            .vectors(&["NOPE".to_string()], None, None)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownVector { .. }));
    }

    #[test]
    fn raw_store_rejects_any_resampling_request() {
        let provider = stored_provider(None);
        let err = provider
            .vectors(&["A".to_string()], None, Some(Frequency::Daily))
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnsupportedResampling {
                requested: Frequency::Daily,
                locked: None,
            }
        ));
    }

    #[test]
    fn locked_store_accepts_its_own_frequency_only() {
        let provider = stored_provider(Some(Frequency::Daily));
        assert_eq!(provider.locked_frequency(), Some(Frequency::Daily));

        assert!(provider.vectors(&["A".to_string()], None, None).is_ok());
        assert!(
            provider
                .vectors(&["A".to_string()], None, Some(Frequency::Daily))
                .is_ok()
        );
        let err = provider
            .vectors(&["A".to_string()], None, Some(Frequency::Monthly))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedResampling { .. }));
    }

    #[test]
    fn vectors_filters_realizations_and_keeps_column_order() -> TestResult {
        let provider = stored_provider(None);

        let batch = provider.vectors(&["C".to_string(), "A".to_string()], Some(&[2]), None)?;
        assert_eq!(batch.num_rows(), 2); // realization 2 has two raw rows
        assert_eq!(batch.schema().field(0).name(), "DATE");
        assert_eq!(batch.schema().field(1).name(), "REAL");
        assert_eq!(batch.schema().field(2).name(), "C");
        assert_eq!(batch.schema().field(3).name(), "A");

        let reals = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert!(reals.values().iter().all(|r| *r == 2));
        Ok(())
    }

    #[test]
    fn empty_realization_selection_yields_empty_batch() -> TestResult {
        let provider = stored_provider(None);
        let batch = provider.vectors(&["A".to_string()], Some(&[]), None)?;
        assert_eq!(batch.num_rows(), 0);

        // Unknown realizations are dropped, not errors.
        let batch = provider.vectors(&["A".to_string()], Some(&[99]), None)?;
        assert_eq!(batch.num_rows(), 0);
        Ok(())
    }

    #[test]
    fn vectors_at_date_requires_exact_grid_membership() -> TestResult {
        let provider = stored_provider(None);

        // 2020-01-04 is a raw sample of realization 0 only.
        let batch = provider.vectors_at_date(utc_day(2020, 1, 4), &["A".to_string()], None)?;
        assert_eq!(batch.num_rows(), 1);
        let reals = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(reals.value(0), 0);
        let a = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(a.value(0), 40.0);

        // Off-grid date fails.
        let err = provider
            .vectors_at_date(utc_day(2020, 1, 3), &["A".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, QueryError::DateNotFound { .. }));
        Ok(())
    }

    #[test]
    fn dates_follow_realization_filter() -> TestResult {
        let provider = stored_provider(None);

        let all = provider.dates(None)?;
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], utc_day(2020, 1, 1));

        let real2 = provider.dates(Some(&[2]))?;
        assert_eq!(real2, vec![utc_day(2020, 1, 2), utc_day(2020, 1, 5)]);
        Ok(())
    }

    #[test]
    fn locked_store_serves_shared_grid_dates() -> TestResult {
        let provider = stored_provider(Some(Frequency::Daily));
        let dates = provider.dates(None)?;
        // Realization 0 spans Jan 1..=6, realization 2 spans Jan 2..=5.
        assert_eq!(dates.first(), Some(&utc_day(2020, 1, 1)));
        assert_eq!(dates.last(), Some(&utc_day(2020, 1, 6)));
        assert_eq!(dates.len(), 6);

        // Every grid member answers exact-date queries.
        let batch = provider.vectors_at_date(utc_day(2020, 1, 3), &["A".to_string()], None)?;
        assert_eq!(batch.num_rows(), 2);
        Ok(())
    }

    #[test]
    fn metadata_is_served_from_field_metadata() {
        let provider = stored_provider(None);
        let meta = provider.vector_metadata("A").expect("metadata");
        assert_eq!(
            meta.classification,
            crate::metadata::VectorClassification::Cumulative
        );
        assert!(provider.vector_metadata("NOPE").is_none());
    }
}
