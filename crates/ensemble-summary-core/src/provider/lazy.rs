//! Provider over in-memory per-realization tables with resample-on-read.
//!
//! Realization tables are validated once at construction and kept as-is
//! after that; every query with a `frequency` argument resamples the
//! touched realizations on the fly, each over its own date horizon.
//! Exact-date queries are answered by point sampling, so any date works,
//! on-grid or off.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, TimestampMillisecondArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::metadata::{VectorMetadata, VectorRange};
use crate::provider::{
    ArrowSnafu, MalformedRealizationSnafu, QueryResult, ResampleSnafu, SummaryProvider,
    TimestampOutOfRangeSnafu, UnknownVectorSnafu, filter_names_by_range, select_realizations,
};
use crate::resampling::frequency::{Frequency, datetime_from_millis, millis_from_datetime};
use crate::resampling::resample::{resample_realization_batch, sample_realization_at_date};
use crate::store::{ImportResult, compute_vector_ranges, validate_realization_tables};
use crate::table::{DATE_COLUMN, REAL_COLUMN, date_column_type, float_array_from_f64};

/// Resampling-capable provider over raw per-realization tables.
#[derive(Debug, Clone)]
pub struct LazySummaryProvider {
    tables: BTreeMap<i32, RecordBatch>,
    vector_fields: Vec<FieldRef>,
    vector_names: Vec<String>,
    ranges: BTreeMap<String, VectorRange>,
}

impl LazySummaryProvider {
    /// Validate and wrap raw per-realization tables.
    ///
    /// Applies the same input invariants as a backing-store import: every
    /// table needs a millisecond `DATE` column with strictly increasing
    /// unique values, matching vector columns across realizations and no
    /// nulls. Zero-row tables are dropped.
    pub fn new(tables: BTreeMap<i32, RecordBatch>) -> ImportResult<Self> {
        let (keep, vector_fields, ranges) = {
            let validated = validate_realization_tables(&tables)?;
            let ranges = compute_vector_ranges(&validated)?;
            let keep: BTreeSet<i32> = validated.realizations.iter().map(|(id, _)| *id).collect();
            (keep, validated.vector_fields, ranges)
        };
        let tables: BTreeMap<i32, RecordBatch> = tables
            .into_iter()
            .filter(|(id, _)| keep.contains(id))
            .collect();

        let mut vector_names: Vec<String> =
            vector_fields.iter().map(|f| f.name().clone()).collect();
        vector_names.sort_unstable();

        Ok(LazySummaryProvider {
            tables,
            vector_fields,
            vector_names,
            ranges,
        })
    }

    fn field_by_name(&self, name: &str) -> QueryResult<&FieldRef> {
        self.vector_fields
            .iter()
            .find(|f| f.name() == name)
            .context(UnknownVectorSnafu { name })
    }

    /// Output schema for [`SummaryProvider::vectors`]: `DATE`, `REAL`, then
    /// the requested vectors with their source field metadata.
    fn vectors_schema(&self, vector_names: &[String]) -> QueryResult<SchemaRef> {
        let mut fields: Vec<FieldRef> = vec![
            Arc::new(Field::new(DATE_COLUMN, date_column_type(), false)),
            Arc::new(Field::new(REAL_COLUMN, DataType::Int32, false)),
        ];
        for name in vector_names {
            fields.push(self.field_by_name(name)?.clone());
        }
        Ok(Arc::new(Schema::new(fields)))
    }

    fn date_millis_of(&self, realization: i32, batch: &RecordBatch) -> QueryResult<Vec<i64>> {
        let idx = batch
            .schema_ref()
            .index_of(DATE_COLUMN)
            .context(ArrowSnafu)?;
        let dates = batch
            .column(idx)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .context(MalformedRealizationSnafu { realization })?;
        Ok(dates.values().to_vec())
    }
}

impl SummaryProvider for LazySummaryProvider {
    fn vector_names(&self) -> Vec<String> {
        self.vector_names.clone()
    }

    fn vector_names_filtered_by_value(
        &self,
        exclude_all_zero: bool,
        exclude_constant: bool,
    ) -> Vec<String> {
        filter_names_by_range(
            &self.vector_names,
            &self.ranges,
            exclude_all_zero,
            exclude_constant,
        )
    }

    fn realizations(&self) -> Vec<i32> {
        self.tables.keys().copied().collect()
    }

    fn dates(&self, realizations: Option<&[i32]>) -> QueryResult<Vec<DateTime<Utc>>> {
        let selected = select_realizations(self.realizations(), realizations);
        let mut distinct: BTreeSet<DateTime<Utc>> = BTreeSet::new();
        for id in selected {
            if let Some(batch) = self.tables.get(&id) {
                for millis in self.date_millis_of(id, batch)? {
                    let date = datetime_from_millis(millis).context(TimestampOutOfRangeSnafu {
                        realization: id,
                        millis,
                    })?;
                    distinct.insert(date);
                }
            }
        }
        Ok(distinct.into_iter().collect())
    }

    fn vectors(
        &self,
        vector_names: &[String],
        realizations: Option<&[i32]>,
        frequency: Option<Frequency>,
    ) -> QueryResult<RecordBatch> {
        let schema = self.vectors_schema(vector_names)?;
        let selected = select_realizations(self.realizations(), realizations);
        if selected.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }

        let mut chunks: Vec<RecordBatch> = Vec::with_capacity(selected.len());
        for id in selected {
            let Some(raw) = self.tables.get(&id) else {
                continue;
            };
            let batch = match frequency {
                Some(freq) => resample_realization_batch(raw, freq).context(ResampleSnafu)?,
                None => raw.clone(),
            };
            let rows = batch.num_rows();
            let batch_schema = batch.schema_ref().clone();
            let date_idx = batch_schema.index_of(DATE_COLUMN).context(ArrowSnafu)?;

            let mut columns: Vec<ArrayRef> = vec![
                batch.column(date_idx).clone(),
                Arc::new(Int32Array::from(vec![id; rows])),
            ];
            for name in vector_names {
                let idx = batch_schema.index_of(name).context(ArrowSnafu)?;
                columns.push(batch.column(idx).clone());
            }
            chunks.push(RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)?);
        }
        concat_batches(&schema, &chunks).context(ArrowSnafu)
    }

    fn vectors_at_date(
        &self,
        date: DateTime<Utc>,
        vector_names: &[String],
        realizations: Option<&[i32]>,
    ) -> QueryResult<RecordBatch> {
        let mut fields: Vec<FieldRef> =
            vec![Arc::new(Field::new(REAL_COLUMN, DataType::Int32, false))];
        for name in vector_names {
            fields.push(self.field_by_name(name)?.clone());
        }
        let schema = Arc::new(Schema::new(fields));

        let selected = select_realizations(self.realizations(), realizations);
        if selected.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }

        let date_millis = millis_from_datetime(date);
        let mut reals: Vec<i32> = Vec::with_capacity(selected.len());
        let mut per_vector: Vec<Vec<f64>> = vec![Vec::new(); vector_names.len()];
        for id in selected {
            let Some(raw) = self.tables.get(&id) else {
                continue;
            };
            // Project to DATE plus the requested vectors so the sampled
            // values come back in request order.
            let batch_schema = raw.schema_ref();
            let date_idx = batch_schema.index_of(DATE_COLUMN).context(ArrowSnafu)?;
            let mut indices = vec![date_idx];
            for name in vector_names {
                indices.push(batch_schema.index_of(name).context(ArrowSnafu)?);
            }
            let projected = raw.project(&indices).context(ArrowSnafu)?;
            let values =
                sample_realization_at_date(&projected, date_millis).context(ResampleSnafu)?;
            ensure!(
                values.len() == vector_names.len(),
                MalformedRealizationSnafu { realization: id }
            );
            reals.push(id);
            for (dst, value) in per_vector.iter_mut().zip(values) {
                dst.push(value);
            }
        }

        let mut columns: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(reals))];
        for (values, field) in per_vector.into_iter().zip(&schema.fields()[1..]) {
            let array = float_array_from_f64(values, field.data_type()).context(
                MalformedRealizationSnafu {
                    realization: -1_i32,
                },
            )?;
            columns.push(array);
        }
        RecordBatch::try_new(schema, columns).context(ArrowSnafu)
    }

    fn vector_metadata(&self, vector_name: &str) -> Option<VectorMetadata> {
        let field = self.vector_fields.iter().find(|f| f.name() == vector_name)?;
        VectorMetadata::from_field(field).ok()
    }

    fn supports_resampling(&self) -> bool {
        true
    }
}
