//! Per-file ingestion: read, normalize, synthesize, load, repair and
//! post-process.
//!
//! Each file ends in exactly one [`IngestOutcome`]. A failure in one file is
//! reported and the run moves on to the next.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use geoload_formats::drivers::driver_for_path;
use geoload_formats::read_vector;
use log::{info, warn};

use crate::config::IngestOptions;
use crate::ddl::synthesize;
use crate::error::{GeoLoadError, ReadError, Result, SchemaError};
use crate::geometry::normalize;
use crate::ident::{normalize_columns, table_name_for};
use crate::loader::load;
use crate::post_process::post_process;
use crate::repair::repair;
use crate::store::SpatialStore;
use crate::types::{IngestOutcome, IngestStatus, IngestSummary, TableRef};

/// Stages a file passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Read,
    NormalizeColumns,
    NormalizeGeometry,
    SynthesizeSchema,
    Load,
    Repair,
    PostProcess,
}

impl IngestStage {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            IngestStage::Read => "read",
            IngestStage::NormalizeColumns => "column normalization",
            IngestStage::NormalizeGeometry => "geometry normalization",
            IngestStage::SynthesizeSchema => "schema synthesis",
            IngestStage::Load => "load",
            IngestStage::Repair => "repair",
            IngestStage::PostProcess => "post-process",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure, before it is turned into an outcome.
struct StageFailure {
    stage: IngestStage,
    error: GeoLoadError,
    table: Option<TableRef>,
}

fn at<E: Into<GeoLoadError>>(stage: IngestStage, table: Option<&TableRef>) -> impl FnOnce(E) -> StageFailure {
    let table = table.cloned();
    move |error| StageFailure {
        stage,
        error: error.into(),
        table,
    }
}

/// Ingests every source: files as given, directories expanded to the
/// vector files they contain (sorted, not recursive).
///
/// # Errors
///
/// Returns an error only for problems that stop the whole run: invalid
/// options or a failure to install PostGIS. Per-file failures are reported
/// in the summary.
pub async fn ingest_all(
    store: &dyn SpatialStore,
    sources: &[PathBuf],
    options: &IngestOptions,
) -> Result<IngestSummary> {
    options.validate()?;
    if options.ensure_postgis {
        store.ensure_postgis().await?;
    }

    let mut summary = IngestSummary::default();
    for source in sources {
        if source.is_dir() {
            match vector_files(source) {
                Ok(files) => {
                    if files.is_empty() {
                        warn!("No vector files in {}", source.display());
                    }
                    for file in files {
                        summary.push(ingest_file(store, &file, options).await);
                    }
                },
                Err(e) => {
                    let error = GeoLoadError::from(ReadError {
                        path: source.clone(),
                        source: geoload_formats::FormatReadError::io(e, "Failed to list directory"),
                    });
                    summary.push(failure_outcome(
                        source,
                        StageFailure {
                            stage: IngestStage::Read,
                            error,
                            table: None,
                        },
                    ));
                },
            }
        } else {
            summary.push(ingest_file(store, source, options).await);
        }
    }

    info!("{summary}");
    Ok(summary)
}

/// Vector files directly inside `dir`, sorted by path. Shapefile sidecars and
/// other unsupported files are left out.
///
/// # Errors
///
/// Returns the I/O error from listing the directory.
pub fn vector_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && driver_for_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Runs one file through every stage.
pub async fn ingest_file(
    store: &dyn SpatialStore,
    path: &Path,
    options: &IngestOptions,
) -> IngestOutcome {
    let outcome = match run_stages(store, path, options).await {
        Ok(outcome) => outcome,
        Err(failure) => failure_outcome(path, failure),
    };
    match outcome.status {
        IngestStatus::Error => warn!("[{}] {}", outcome.status, outcome.message),
        _ => info!("[{}] {}", outcome.status, outcome.message),
    }
    outcome
}

fn failure_outcome(path: &Path, failure: StageFailure) -> IngestOutcome {
    let mut outcome = IngestOutcome::new(
        path.display().to_string(),
        IngestStatus::Error,
        format!(
            "{}: {} failed: {}",
            path.display(),
            failure.stage,
            failure.error
        ),
    );
    outcome.table = failure.table;
    outcome
}

async fn run_stages(
    store: &dyn SpatialStore,
    path: &Path,
    options: &IngestOptions,
) -> std::result::Result<IngestOutcome, StageFailure> {
    let file = path.display().to_string();

    let dataset = read_vector(path)
        .map_err(|source| ReadError {
            path: path.to_path_buf(),
            source,
        })
        .map_err(at(IngestStage::Read, None))?;
    if dataset.is_empty() {
        return Ok(IngestOutcome::new(
            file.clone(),
            IngestStatus::Skip,
            format!("{file}: empty layer '{}'", dataset.layer),
        ));
    }

    let mapping = normalize_columns(&dataset.columns);
    let table = TableRef::new(
        &options.schema,
        &table_name_for(path, &options.table_prefix, options.table_name.as_deref()),
    );

    if dataset.geometry_column.is_none() {
        return Err(at(IngestStage::NormalizeGeometry, Some(&table))(
            SchemaError::MissingGeometry {
                layer: dataset.layer.clone(),
            },
        ));
    }
    let normalized = normalize(dataset, options.target_srid, options.promote_to_multi)
        .map_err(at(IngestStage::NormalizeGeometry, Some(&table)))?;

    let plan = synthesize(
        &normalized.dataset,
        &mapping,
        &table,
        &normalized.geometry_type,
        normalized.srid,
    );

    let report = load(store, &normalized.dataset, &mapping, &plan, options)
        .await
        .map_err(at(IngestStage::Load, Some(&table)))?;

    let repaired = repair(
        store,
        &report.target,
        options.repair_tolerance,
        normalized.family,
    )
    .await
    .map_err(at(IngestStage::Repair, Some(&table)))?;

    let (post_status, post_message) = post_process(store, &table, &options.post_process)
        .await
        .map_err(at(IngestStage::PostProcess, Some(&table)))?;

    let mut message = format!(
        "{file}: {} rows into {table} ({}, SRID {}); {repaired}",
        report.rows, plan.target.geometry_type, plan.target.srid
    );
    if post_status == IngestStatus::Ok {
        message.push_str(&format!("; {post_message}"));
    }

    let mut outcome = IngestOutcome::new(file, IngestStatus::Ok, message);
    outcome.table = Some(table);
    outcome.rows = report.rows;
    Ok(outcome)
}
