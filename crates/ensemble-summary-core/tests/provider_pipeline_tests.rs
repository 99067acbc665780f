#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Float64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use ensemble_summary_core::metadata::{VectorClassification, VectorMetadata};
use ensemble_summary_core::provider::{
    LazySummaryProvider, QueryError, StoredSummaryProvider, SummaryProvider,
};
use ensemble_summary_core::registry::{ImportDescriptor, ProviderRegistry, storage_key_v1};
use ensemble_summary_core::resampling::frequency::Frequency;
use ensemble_summary_core::store::{load_backing_store, write_backing_store};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn utc_day(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
}

fn millis(y: i32, mo: u32, d: u32) -> i64 {
    utc_day(y, mo, d).timestamp_millis()
}

fn vector_field(name: &str, classification: VectorClassification) -> Field {
    let meta = VectorMetadata {
        unit: "SM3/DAY".to_string(),
        classification,
        is_historical: false,
        keyword: Some(name.to_string()),
        entity_name: None,
        completion_index: None,
    };
    Field::new(name, DataType::Float64, false).with_metadata(meta.to_field_metadata())
}

fn realization_batch(
    dates: &[i64],
    vectors: &[(&str, VectorClassification, &[f64])],
) -> RecordBatch {
    let mut fields = vec![Field::new(
        "DATE",
        DataType::Timestamp(arrow::datatypes::TimeUnit::Millisecond, None),
        false,
    )];
    let mut columns: Vec<arrow::array::ArrayRef> =
        vec![Arc::new(TimestampMillisecondArray::from(dates.to_vec()))];
    for (name, classification, values) in vectors {
        fields.push(vector_field(name, *classification));
        columns.push(Arc::new(Float64Array::from(values.to_vec())));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("valid realization batch")
}

/// Three realizations over distinct irregular grids, one cumulative and one
/// rate vector each.
fn ensemble() -> BTreeMap<i32, RecordBatch> {
    let mut tables = BTreeMap::new();
    tables.insert(
        0,
        realization_batch(
            &[millis(2020, 1, 1), millis(2020, 1, 4), millis(2020, 1, 6)],
            &[
                ("FOPT", VectorClassification::Cumulative, &[10.0, 40.0, 60.0]),
                ("FOPR", VectorClassification::Rate, &[1.0, 4.0, 6.0]),
            ],
        ),
    );
    tables.insert(
        1,
        realization_batch(
            &[millis(2020, 1, 2), millis(2020, 1, 5)],
            &[
                ("FOPT", VectorClassification::Cumulative, &[5.0, 25.0]),
                ("FOPR", VectorClassification::Rate, &[2.0, 2.0]),
            ],
        ),
    );
    tables.insert(
        4,
        realization_batch(
            &[millis(2020, 1, 1)],
            &[
                ("FOPT", VectorClassification::Cumulative, &[7.0]),
                ("FOPR", VectorClassification::Rate, &[3.0]),
            ],
        ),
    );
    tables
}

fn f64_column(batch: &RecordBatch, name: &str) -> Vec<f64> {
    let idx = batch.schema_ref().index_of(name).expect("column present");
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("f64 column")
        .values()
        .to_vec()
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn raw_store_round_trip_preserves_queries() -> TestResult {
    let tmp = TempDir::new()?;
    let registry = ProviderRegistry::new(tmp.path());
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-a".to_string(),
        realization_glob: "realization-*".to_string(),
        frequency: None,
    };

    let lazy = LazySummaryProvider::new(ensemble())?;
    let stored = registry.presampled_provider(&descriptor, || Ok(ensemble()))?;

    assert_eq!(stored.vector_names(), lazy.vector_names());
    assert_eq!(stored.realizations(), vec![0, 1, 4]);
    assert_eq!(stored.dates(None)?, lazy.dates(None)?);

    let from_store = stored.vectors(&names(&["FOPT", "FOPR"]), None, None)?;
    let from_lazy = lazy.vectors(&names(&["FOPT", "FOPR"]), None, None)?;
    assert_eq!(from_store.num_rows(), 6);
    assert_eq!(f64_column(&from_store, "FOPT"), f64_column(&from_lazy, "FOPT"));
    assert_eq!(f64_column(&from_store, "FOPR"), f64_column(&from_lazy, "FOPR"));
    Ok(())
}

#[test]
fn second_registry_over_same_directory_hits_the_artifact() -> TestResult {
    let tmp = TempDir::new()?;
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-b".to_string(),
        realization_glob: "*".to_string(),
        frequency: Some(Frequency::Daily),
    };

    ProviderRegistry::new(tmp.path()).presampled_provider(&descriptor, || Ok(ensemble()))?;

    // A fresh registry instance must resolve from disk alone.
    let provider = ProviderRegistry::new(tmp.path())
        .presampled_provider(&descriptor, || panic!("fetch must not run on a cache hit"))?;
    assert_eq!(provider.locked_frequency(), Some(Frequency::Daily));
    assert_eq!(provider.realizations(), vec![0, 1, 4]);
    Ok(())
}

#[test]
fn presampled_store_matches_lazy_resampling() -> TestResult {
    let tmp = TempDir::new()?;
    let registry = ProviderRegistry::new(tmp.path());
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-c".to_string(),
        realization_glob: "*".to_string(),
        frequency: Some(Frequency::Daily),
    };

    let stored = registry.presampled_provider(&descriptor, || Ok(ensemble()))?;
    let lazy = LazySummaryProvider::new(ensemble())?;

    let wanted = names(&["FOPT", "FOPR"]);
    let from_store = stored.vectors(&wanted, None, Some(Frequency::Daily))?;
    let from_lazy = lazy.vectors(&wanted, None, Some(Frequency::Daily))?;
    assert_eq!(from_store.num_rows(), from_lazy.num_rows());
    assert_eq!(f64_column(&from_store, "FOPT"), f64_column(&from_lazy, "FOPT"));
    assert_eq!(f64_column(&from_store, "FOPR"), f64_column(&from_lazy, "FOPR"));

    // Resampling an already-daily grid is a no-op, so the stored grid and a
    // second lazy pass over it agree.
    let daily_tables: BTreeMap<i32, RecordBatch> = ensemble()
        .into_iter()
        .map(|(id, batch)| {
            let resampled = ensemble_summary_core::resampling::resample_realization_batch(
                &batch,
                Frequency::Daily,
            )?;
            Ok((id, resampled))
        })
        .collect::<Result<_, ensemble_summary_core::resampling::ResampleError>>()?;
    let twice = LazySummaryProvider::new(daily_tables)?;
    let from_twice = twice.vectors(&wanted, None, Some(Frequency::Daily))?;
    assert_eq!(f64_column(&from_store, "FOPT"), f64_column(&from_twice, "FOPT"));
    Ok(())
}

#[test]
fn point_queries_agree_between_provider_flavors_on_grid() -> TestResult {
    let tmp = TempDir::new()?;
    let registry = ProviderRegistry::new(tmp.path());
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-d".to_string(),
        realization_glob: "*".to_string(),
        frequency: Some(Frequency::Daily),
    };

    let stored = registry.presampled_provider(&descriptor, || Ok(ensemble()))?;
    let lazy = LazySummaryProvider::new(ensemble())?;

    // Jan 3 is on the daily grid of realizations 0 and 1, off both raw grids.
    let date = utc_day(2020, 1, 3);
    let from_store = stored.vectors_at_date(date, &names(&["FOPT"]), Some(&[0, 1]))?;
    let from_lazy = lazy.vectors_at_date(date, &names(&["FOPT"]), Some(&[0, 1]))?;
    assert_eq!(from_store.num_rows(), 2);
    assert_eq!(f64_column(&from_store, "FOPT"), f64_column(&from_lazy, "FOPT"));
    Ok(())
}

#[test]
fn stored_provider_rejects_off_grid_and_foreign_frequencies() -> TestResult {
    let tmp = TempDir::new()?;
    let registry = ProviderRegistry::new(tmp.path());
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-e".to_string(),
        realization_glob: "*".to_string(),
        frequency: None,
    };
    let stored = registry.presampled_provider(&descriptor, || Ok(ensemble()))?;

    let err = stored
        .vectors_at_date(utc_day(2020, 1, 3), &names(&["FOPT"]), None)
        .unwrap_err();
    assert!(matches!(err, QueryError::DateNotFound { .. }));

    let err = stored
        .vectors(&names(&["FOPT"]), None, Some(Frequency::Monthly))
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::UnsupportedResampling {
            requested: Frequency::Monthly,
            locked: None,
        }
    ));
    Ok(())
}

#[test]
fn metadata_survives_the_parquet_round_trip() -> TestResult {
    let tmp = TempDir::new()?;
    let registry = ProviderRegistry::new(tmp.path());
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-f".to_string(),
        realization_glob: "*".to_string(),
        frequency: None,
    };
    let stored = registry.presampled_provider(&descriptor, || Ok(ensemble()))?;

    let meta = stored.vector_metadata("FOPR").expect("metadata present");
    assert_eq!(meta.classification, VectorClassification::Rate);
    assert_eq!(meta.unit, "SM3/DAY");
    assert_eq!(meta.keyword.as_deref(), Some("FOPR"));

    // Range-based filtering works off the persisted blob without a scan.
    assert_eq!(
        stored.vector_names_filtered_by_value(false, true),
        vec!["FOPR", "FOPT"]
    );
    Ok(())
}

#[test]
fn direct_store_functions_and_registry_share_artifacts() -> TestResult {
    let tmp = TempDir::new()?;
    let descriptor = ImportDescriptor {
        ensemble_path: "/sim/case-g".to_string(),
        realization_glob: "*".to_string(),
        frequency: None,
    };
    let key = storage_key_v1(&descriptor);
    let tables = ensemble();
    write_backing_store(tmp.path(), &key, &tables, None)?;

    // The registry resolves the pre-written artifact without fetching.
    let provider = ProviderRegistry::new(tmp.path())
        .presampled_provider(&descriptor, || panic!("artifact already present"))?;
    assert_eq!(provider.realizations(), vec![0, 1, 4]);

    let table = load_backing_store(tmp.path(), &key)?.expect("artifact present");
    let direct = StoredSummaryProvider::new(table)?;
    assert_eq!(direct.vector_names(), provider.vector_names());
    Ok(())
}
