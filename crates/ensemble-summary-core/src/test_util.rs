//! Shared helpers for unit tests: small in-memory realization batches.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Float64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};

use crate::metadata::{VectorClassification, VectorMetadata};
use crate::table::{DATE_COLUMN, date_column_type};

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn millis(y: i32, mo: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0)
        .unwrap()
        .timestamp_millis()
}

pub(crate) fn vector_meta(class: VectorClassification) -> VectorMetadata {
    VectorMetadata {
        unit: "SM3".to_string(),
        classification: class,
        is_historical: false,
        keyword: None,
        entity_name: None,
        completion_index: None,
    }
}

pub(crate) fn vector_fld(name: &str, class: VectorClassification) -> Field {
    Field::new(name, DataType::Float64, false)
        .with_metadata(vector_meta(class).to_field_metadata())
}

/// Build a single-realization batch: `DATE` plus one `Float64` column per
/// `(name, classification, values)` triple.
pub(crate) fn realization_batch(
    dates: &[i64],
    vectors: &[(&str, VectorClassification, &[f64])],
) -> RecordBatch {
    let mut fields = vec![Field::new(DATE_COLUMN, date_column_type(), false)];
    let mut columns: Vec<arrow::array::ArrayRef> =
        vec![Arc::new(TimestampMillisecondArray::from(dates.to_vec()))];
    for (name, class, values) in vectors {
        fields.push(vector_fld(name, *class));
        columns.push(Arc::new(Float64Array::from(values.to_vec())));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("valid realization batch")
}

/// Two-realization ensemble with a varying cumulative vector `A`, a constant
/// rate vector `C` (1.0) and an all-zero rate vector `Z`.
pub(crate) fn sample_ensemble() -> BTreeMap<i32, RecordBatch> {
    let mut tables = BTreeMap::new();
    tables.insert(
        0,
        realization_batch(
            &[millis(2020, 1, 1), millis(2020, 1, 4), millis(2020, 1, 6)],
            &[
                ("A", VectorClassification::Cumulative, &[10.0, 40.0, 60.0]),
                ("C", VectorClassification::Rate, &[1.0, 1.0, 1.0]),
                ("Z", VectorClassification::Rate, &[0.0, 0.0, 0.0]),
            ],
        ),
    );
    tables.insert(
        2,
        realization_batch(
            &[millis(2020, 1, 2), millis(2020, 1, 5)],
            &[
                ("A", VectorClassification::Cumulative, &[5.0, 25.0]),
                ("C", VectorClassification::Rate, &[1.0, 1.0]),
                ("Z", VectorClassification::Rate, &[0.0, 0.0]),
            ],
        ),
    );
    tables
}
