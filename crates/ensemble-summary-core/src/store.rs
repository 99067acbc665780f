//! The content-addressed columnar backing store.
//!
//! One artifact per storage key: a single Parquet file
//! `<storage_dir>/<key>.parquet` holding the merged summary table of all
//! realizations. Per-vector [`VectorMetadata`] travels in the Arrow field
//! metadata, and the schema metadata carries the precomputed per-vector
//! ranges, the artifact format version, and — for pre-sampled stores — the
//! locked frequency token. All of it survives the Parquet round-trip via the
//! embedded Arrow schema.
//!
//! Writes are write-once-per-key under normal operation and atomic in all
//! cases: the Parquet payload is assembled in memory and handed to
//! [`crate::storage::write_atomic`], so a key either resolves to a complete
//! artifact or to nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arrow::array::{ArrayRef, Int32Array, TimestampMillisecondArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use snafu::prelude::*;
use std::sync::Arc;

use crate::metadata::{
    ENSEMBLE_KEY, FORMAT_VERSION_KEY, FREQUENCY_KEY, MetadataError, VECTOR_RANGES_KEY,
    VectorRange, encode_vector_ranges,
};
use crate::registry::StorageKey;
use crate::resampling::frequency::Frequency;
use crate::storage::{self, StorageError};
use crate::table::{
    DATE_COLUMN, REAL_COLUMN, SummaryTable, TableError, date_column_type, is_vector_type,
    vector_values_f64,
};

/// Version stamped into every artifact's schema metadata and checked on load.
pub const STORE_FORMAT_VERSION: &str = "1";

/// Result alias for import/load operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Errors raised while importing raw realization tables or loading an
/// artifact.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ImportError {
    /// No source rows were found in the import input.
    #[snafu(display("Import input contains no rows"))]
    EmptyImport,

    /// A realization table lacks a required column.
    #[snafu(display("Realization {realization} is missing required column {column}"))]
    MissingRequiredColumn {
        /// The realization whose table is malformed.
        realization: i32,
        /// Name of the missing column.
        column: String,
    },

    /// A required column has the wrong Arrow type.
    #[snafu(display("Realization {realization}: column {column} has unsupported type {datatype:?}"))]
    WrongColumnType {
        /// The realization whose table is malformed.
        realization: i32,
        /// Name of the offending column.
        column: String,
        /// Arrow data type encountered.
        datatype: DataType,
    },

    /// A column contains nulls, which the format forbids.
    #[snafu(display("Realization {realization}: column {column} contains nulls"))]
    NullsInColumn {
        /// The realization whose table is malformed.
        realization: i32,
        /// Name of the offending column.
        column: String,
    },

    /// Dates of one realization table are not strictly increasing.
    #[snafu(display("Realization {realization}: dates are not strictly increasing and unique"))]
    UnsortedDates {
        /// The realization with out-of-order or duplicate dates.
        realization: i32,
    },

    /// A non-`DATE` column is not a supported float vector.
    #[snafu(display("Realization {realization}: vector column {column} has unsupported type {datatype:?}"))]
    UnsupportedVectorColumn {
        /// The realization whose table is malformed.
        realization: i32,
        /// Name of the offending column.
        column: String,
        /// Arrow data type encountered.
        datatype: DataType,
    },

    /// Realizations disagree on the vector column set or their types.
    #[snafu(display("Schema conflict at realization {realization}: {detail}"))]
    SchemaConflict {
        /// The first realization that deviates from the reference schema.
        realization: i32,
        /// Human-readable description of the divergence.
        detail: String,
    },

    /// The aggregated input spans more than one logical ensemble.
    #[snafu(display("Import input spans multiple ensembles: {found}"))]
    MultipleEnsemble {
        /// The distinct ensemble labels encountered, comma separated.
        found: String,
    },

    /// A negative realization id was supplied for a summary import.
    #[snafu(display("Invalid realization id {realization} in import input (must be >= 0)"))]
    NegativeRealizationId {
        /// The offending realization id.
        realization: i32,
    },

    /// The merged table violated a summary-table invariant.
    #[snafu(display("Merged table is invalid: {source}"))]
    Table {
        /// Underlying table validation error.
        source: TableError,
    },

    /// Metadata encoding failed while stamping the artifact.
    #[snafu(display("Metadata error while building artifact: {source}"))]
    Metadata {
        /// Underlying metadata error.
        source: MetadataError,
    },

    /// Arrow error while merging or reassembling batches.
    #[snafu(display("Arrow error in backing store: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Parquet serialization failed.
    #[snafu(display("Parquet write error: {source}"))]
    ParquetWrite {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Parquet deserialization failed; the artifact is corrupt or foreign.
    #[snafu(display("Parquet read error: {source}"))]
    ParquetRead {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Filesystem failure while reading or writing the artifact.
    #[snafu(display("Storage error in backing store: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The artifact was written by an unknown format version.
    #[snafu(display("Unsupported backing-store format version {found} (expected {STORE_FORMAT_VERSION})"))]
    UnsupportedFormatVersion {
        /// The version string found in the artifact, or `<absent>`.
        found: String,
    },
}

/// Absolute path of the artifact for `key` under `storage_dir`.
pub fn artifact_path(storage_dir: &Path, key: &StorageKey) -> PathBuf {
    storage_dir.join(format!("{key}.parquet"))
}

/// Validated view over raw per-realization input tables.
pub(crate) struct ValidatedInput<'a> {
    /// Non-empty realization tables in ascending id order.
    pub realizations: Vec<(i32, &'a RecordBatch)>,
    /// Vector fields of the reference realization, in its column order.
    pub vector_fields: Vec<FieldRef>,
    /// The unique ensemble label carried by the input, if any.
    pub ensemble_label: Option<String>,
}

fn sorted_vector_signature(fields: &[FieldRef]) -> Vec<(String, DataType)> {
    let mut sig: Vec<(String, DataType)> = fields
        .iter()
        .map(|f| (f.name().clone(), f.data_type().clone()))
        .collect();
    sig.sort();
    sig
}

fn validate_one(realization: i32, batch: &RecordBatch) -> ImportResult<Vec<FieldRef>> {
    let schema = batch.schema_ref();
    let (date_idx, date_field) =
        schema
            .column_with_name(DATE_COLUMN)
            .context(MissingRequiredColumnSnafu {
                realization,
                column: DATE_COLUMN,
            })?;
    ensure!(
        *date_field.data_type() == date_column_type(),
        WrongColumnTypeSnafu {
            realization,
            column: DATE_COLUMN,
            datatype: date_field.data_type().clone(),
        }
    );
    ensure!(
        batch.column(date_idx).null_count() == 0,
        NullsInColumnSnafu {
            realization,
            column: DATE_COLUMN,
        }
    );

    let dates = batch
        .column(date_idx)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .context(WrongColumnTypeSnafu {
            realization,
            column: DATE_COLUMN,
            datatype: date_field.data_type().clone(),
        })?;
    ensure!(
        dates.values().windows(2).all(|w| w[0] < w[1]),
        UnsortedDatesSnafu { realization }
    );

    let mut vector_fields = Vec::new();
    for (idx, field) in schema.fields().iter().enumerate() {
        if idx == date_idx {
            continue;
        }
        ensure!(
            is_vector_type(field.data_type()),
            UnsupportedVectorColumnSnafu {
                realization,
                column: field.name().clone(),
                datatype: field.data_type().clone(),
            }
        );
        ensure!(
            batch.column(idx).null_count() == 0,
            NullsInColumnSnafu {
                realization,
                column: field.name().clone(),
            }
        );
        vector_fields.push(field.clone());
    }
    Ok(vector_fields)
}

/// Validate raw per-realization tables against the import invariants.
///
/// Empty realization tables are dropped; the whole input is `EmptyImport`
/// when nothing survives. The first non-empty realization becomes the
/// reference schema all others must match.
pub(crate) fn validate_realization_tables(
    tables: &BTreeMap<i32, RecordBatch>,
) -> ImportResult<ValidatedInput<'_>> {
    let mut realizations = Vec::new();
    let mut reference: Option<(i32, Vec<FieldRef>, Vec<(String, DataType)>)> = None;
    let mut ensemble_label: Option<String> = None;

    for (&realization, batch) in tables {
        ensure!(realization >= 0, NegativeRealizationIdSnafu { realization });
        if batch.num_rows() == 0 {
            continue;
        }
        let fields = validate_one(realization, batch)?;

        if let Some(label) = batch.schema_ref().metadata().get(ENSEMBLE_KEY) {
            match &ensemble_label {
                None => ensemble_label = Some(label.clone()),
                Some(existing) if existing == label => {}
                Some(existing) => {
                    return MultipleEnsembleSnafu {
                        found: format!("{existing}, {label}"),
                    }
                    .fail();
                }
            }
        }

        match &reference {
            None => {
                let sig = sorted_vector_signature(&fields);
                reference = Some((realization, fields, sig));
            }
            Some((_, _, ref_sig)) => {
                let sig = sorted_vector_signature(&fields);
                if sig != *ref_sig {
                    let ref_names: Vec<&str> =
                        ref_sig.iter().map(|(n, _)| n.as_str()).collect();
                    let names: Vec<&str> = sig.iter().map(|(n, _)| n.as_str()).collect();
                    return SchemaConflictSnafu {
                        realization,
                        detail: format!(
                            "vector columns {names:?} do not match reference {ref_names:?} (or their types differ)"
                        ),
                    }
                    .fail();
                }
            }
        }
        realizations.push((realization, batch));
    }

    let (_, vector_fields, _) = reference.context(EmptyImportSnafu)?;
    Ok(ValidatedInput {
        realizations,
        vector_fields,
        ensemble_label,
    })
}

/// Compute the `(min, max)` range of every vector across all realizations.
pub(crate) fn compute_vector_ranges(
    input: &ValidatedInput<'_>,
) -> ImportResult<BTreeMap<String, VectorRange>> {
    let mut ranges: BTreeMap<String, VectorRange> = BTreeMap::new();
    for field in &input.vector_fields {
        let name = field.name();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (realization, batch) in &input.realizations {
            let (idx, col_field) = batch.schema_ref().column_with_name(name).context(
                MissingRequiredColumnSnafu {
                    realization: *realization,
                    column: name.clone(),
                },
            )?;
            let values =
                vector_values_f64(batch.column(idx).as_ref()).context(WrongColumnTypeSnafu {
                    realization: *realization,
                    column: name.clone(),
                    datatype: col_field.data_type().clone(),
                })?;
            for v in values {
                min = min.min(v);
                max = max.max(v);
            }
        }
        ranges.insert(name.clone(), VectorRange { min, max });
    }
    Ok(ranges)
}

/// Merge validated realization tables into one summary table.
///
/// Schema metadata is stamped with the format version, the precomputed
/// vector ranges, the locked `frequency` token (when pre-sampled) and the
/// input's ensemble label.
fn merge_realizations(
    input: &ValidatedInput<'_>,
    frequency: Option<Frequency>,
) -> ImportResult<SummaryTable> {
    let ranges = compute_vector_ranges(input)?;

    let mut schema_metadata = std::collections::HashMap::new();
    schema_metadata.insert(
        FORMAT_VERSION_KEY.to_string(),
        STORE_FORMAT_VERSION.to_string(),
    );
    schema_metadata.insert(
        VECTOR_RANGES_KEY.to_string(),
        encode_vector_ranges(&ranges).context(MetadataSnafu)?,
    );
    if let Some(freq) = frequency {
        schema_metadata.insert(FREQUENCY_KEY.to_string(), freq.to_string());
    }
    if let Some(label) = &input.ensemble_label {
        schema_metadata.insert(ENSEMBLE_KEY.to_string(), label.clone());
    }

    let mut fields: Vec<FieldRef> = vec![
        Arc::new(Field::new(DATE_COLUMN, date_column_type(), false)),
        Arc::new(Field::new(REAL_COLUMN, DataType::Int32, false)),
    ];
    fields.extend(input.vector_fields.iter().cloned());
    let merged_schema = Arc::new(Schema::new_with_metadata(fields, schema_metadata));

    let mut chunks = Vec::with_capacity(input.realizations.len());
    for (realization, batch) in &input.realizations {
        let schema = batch.schema_ref();
        // Presence and types were validated above; lookups cannot fail here.
        let (date_idx, _) =
            schema
                .column_with_name(DATE_COLUMN)
                .context(MissingRequiredColumnSnafu {
                    realization: *realization,
                    column: DATE_COLUMN,
                })?;
        let mut columns: Vec<ArrayRef> = vec![
            batch.column(date_idx).clone(),
            Arc::new(Int32Array::from(vec![*realization; batch.num_rows()])),
        ];
        for field in &input.vector_fields {
            let (idx, _) = schema.column_with_name(field.name()).context(
                MissingRequiredColumnSnafu {
                    realization: *realization,
                    column: field.name().clone(),
                },
            )?;
            columns.push(batch.column(idx).clone());
        }
        chunks.push(RecordBatch::try_new(merged_schema.clone(), columns).context(ArrowSnafu)?);
    }

    let merged = concat_batches(&merged_schema, &chunks).context(ArrowSnafu)?;
    SummaryTable::try_new(merged).context(TableSnafu)
}

/// Merge raw realization tables into one artifact and persist it atomically
/// under `storage_dir/<key>.parquet`.
///
/// `frequency` records the pre-sampling cadence the tables were resampled to
/// before this call, or `None` for a raw store. Fails with `EmptyImport`
/// when the input holds no rows and with `SchemaConflict` when realizations
/// disagree on vector columns or types. A failed write never leaves a key
/// that [`load_backing_store`] reports as present.
pub fn write_backing_store(
    storage_dir: &Path,
    key: &StorageKey,
    tables: &BTreeMap<i32, RecordBatch>,
    frequency: Option<Frequency>,
) -> ImportResult<()> {
    let input = validate_realization_tables(tables)?;
    let table = merge_realizations(&input, frequency)?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, table.schema().clone(), None)
        .context(ParquetWriteSnafu)?;
    writer.write(table.batch()).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;

    let path = artifact_path(storage_dir, key);
    storage::write_atomic(&path, &buf).context(StorageSnafu)?;
    log::debug!(
        "wrote backing store {key}: {} realizations, {} rows",
        input.realizations.len(),
        table.num_rows()
    );
    Ok(())
}

/// Load the artifact for `key`, or `None` when no artifact exists.
///
/// A present-but-unreadable artifact is an error, never a partial load: the
/// whole file is parsed and revalidated through [`SummaryTable::try_new`]
/// before anything is returned.
pub fn load_backing_store(
    storage_dir: &Path,
    key: &StorageKey,
) -> ImportResult<Option<SummaryTable>> {
    let path = artifact_path(storage_dir, key);
    let bytes = match storage::read_all_bytes(&path) {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e).context(StorageSnafu),
    };

    let builder =
        ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).context(ParquetReadSnafu)?;
    let schema = builder.schema().clone();
    let reader = builder.build().context(ParquetReadSnafu)?;
    let batches: Vec<RecordBatch> = reader
        .collect::<Result<Vec<_>, ArrowError>>()
        .context(ArrowSnafu)?;
    let merged = if batches.is_empty() {
        RecordBatch::new_empty(schema.clone())
    } else {
        concat_batches(&schema, &batches).context(ArrowSnafu)?
    };

    let version = schema
        .metadata()
        .get(FORMAT_VERSION_KEY)
        .cloned()
        .unwrap_or_else(|| "<absent>".to_string());
    ensure!(
        version == STORE_FORMAT_VERSION,
        UnsupportedFormatVersionSnafu { found: version }
    );

    let table = SummaryTable::try_new(merged).context(TableSnafu)?;
    Ok(Some(table))
}
