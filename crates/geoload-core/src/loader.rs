//! Table creation and bulk loading.

use std::fs;
use std::path::{Path, PathBuf};

use geoload_formats::Dataset;
use geozero::{CoordDimensions, ToWkb};
use log::{debug, info};

use crate::config::IngestOptions;
use crate::ddl::SchemaPlan;
use crate::error::{GeometryError, LoadError, Result, SchemaError};
use crate::ident::ColumnMapping;
use crate::store::SpatialStore;
use crate::type_mapping::coerce;
use crate::types::{LoadRow, TargetTable};

/// What a load wrote.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub target: TargetTable,
    pub rows: u64,
    /// The DDL artifact, when a directory was configured.
    pub artifact: Option<PathBuf>,
}

/// Writes `plan` as `<schema>.<table>.sql` into `dir`, creating the
/// directory if needed.
///
/// # Errors
///
/// Returns [`LoadError::Artifact`] when the directory or file cannot be
/// written.
pub fn write_artifact(plan: &SchemaPlan, dir: &Path) -> std::result::Result<PathBuf, LoadError> {
    let path = dir.join(plan.artifact_name());
    fs::create_dir_all(dir)
        .and_then(|()| fs::write(&path, plan.render()))
        .map_err(|source| LoadError::Artifact {
            path: path.clone(),
            source,
        })?;
    debug!("Wrote DDL artifact {}", path.display());
    Ok(path)
}

/// Converts the records of `dataset` into rows shaped like `target`.
///
/// # Errors
///
/// Returns [`SchemaError::RaggedRecord`] for a record without one value per
/// column and [`GeometryError::Encoding`] when a geometry has no WKB form.
pub fn build_rows(
    dataset: &Dataset,
    mapping: &ColumnMapping,
    target: &TargetTable,
) -> Result<Vec<LoadRow>> {
    let attributes: Vec<usize> = mapping.attributes().map(|(index, _)| index).collect();

    dataset
        .records
        .iter()
        .enumerate()
        .map(|(n, record)| -> Result<LoadRow> {
            if record.values.len() != dataset.columns.len() {
                return Err(SchemaError::RaggedRecord {
                    record: n + 1,
                    expected: dataset.columns.len(),
                    found: record.values.len(),
                }
                .into());
            }
            let values = attributes
                .iter()
                .zip(&target.columns)
                .map(|(&index, column)| coerce(&record.values[index], column.pg_type))
                .collect();
            let wkb = record
                .geometry
                .as_ref()
                .map(|g| g.to_wkb(CoordDimensions::xy()))
                .transpose()
                .map_err(|e| GeometryError::Encoding {
                    record: n + 1,
                    message: e.to_string(),
                })?;
            Ok(LoadRow { values, wkb })
        })
        .collect()
}

/// Creates the target table and inserts every record.
///
/// Rows are built before the database is touched, so an encoding failure
/// leaves no table behind.
///
/// # Errors
///
/// Returns the first row conversion, artifact or store error.
pub async fn load(
    store: &dyn SpatialStore,
    dataset: &Dataset,
    mapping: &ColumnMapping,
    plan: &SchemaPlan,
    options: &IngestOptions,
) -> Result<LoadReport> {
    let target = &plan.target;
    let rows = build_rows(dataset, mapping, target)?;

    let artifact = match &options.ddl_dir {
        Some(dir) => Some(write_artifact(plan, dir)?),
        None => None,
    };

    store.create_table(plan, options.mode).await?;
    let inserted = store
        .insert_rows(target, &rows, options.batch_size)
        .await?;
    info!(
        "Loaded {inserted} rows into {} ({} mode)",
        target.table, options.mode
    );

    Ok(LoadReport {
        target: target.clone(),
        rows: inserted,
        artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::synthesize;
    use crate::ident::normalize_columns;
    use crate::type_mapping::SqlValue;
    use crate::types::TableRef;
    use geo_types::{Geometry, Point};
    use geoload_formats::{AttributeValue, Record};

    fn dataset() -> Dataset {
        let mut dataset = Dataset::new("sitios", "sitios.geojson");
        dataset.columns = vec!["Nombre".into(), "geometry".into(), "Altura".into()];
        dataset.records = vec![
            Record {
                values: vec![
                    AttributeValue::Text("Cerro".into()),
                    AttributeValue::Text("ignored".into()),
                    AttributeValue::Int(880),
                ],
                geometry: Some(Geometry::Point(Point::new(-70.6, -33.4))),
            },
            Record {
                values: vec![AttributeValue::Null, AttributeValue::Null, AttributeValue::Null],
                geometry: None,
            },
        ];
        dataset
    }

    #[test]
    fn test_build_rows_drops_geometry_attribute() {
        let dataset = dataset();
        let mapping = normalize_columns(&dataset.columns);
        let plan = synthesize(&dataset, &mapping, &TableRef::new("public", "sitios"), "POINT", 4326);
        let rows = build_rows(&dataset, &mapping, &plan.target).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].values,
            vec![
                SqlValue::Text(Some("Cerro".to_string())),
                SqlValue::BigInt(Some(880)),
            ]
        );
        // little-endian point: byte order, type 1, two doubles
        let wkb = rows[0].wkb.as_ref().unwrap();
        assert_eq!(wkb.len(), 21);
        assert_eq!(&wkb[..5], &[1, 1, 0, 0, 0]);
        assert!(rows[1].wkb.is_none());
        assert!(rows[1].values.iter().all(SqlValue::is_null));
    }

    #[test]
    fn test_ragged_record() {
        let mut dataset = dataset();
        dataset.records[1].values.pop();
        let mapping = normalize_columns(&dataset.columns);
        let plan = synthesize(&dataset, &mapping, &TableRef::new("public", "sitios"), "POINT", 4326);

        let err = build_rows(&dataset, &mapping, &plan.target).unwrap_err();
        assert!(err.to_string().contains("Record 2 has 2 values, expected 3"));
    }

    #[test]
    fn test_write_artifact_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dataset();
        let mapping = normalize_columns(&dataset.columns);
        let plan = synthesize(&dataset, &mapping, &TableRef::new("geo", "sitios"), "POINT", 4326);

        let path = write_artifact(&plan, &dir.path().join("ddl")).unwrap();
        assert!(path.ends_with("ddl/geo.sitios.sql"));
        let script = fs::read_to_string(path).unwrap();
        assert!(script.contains("CREATE TABLE IF NOT EXISTS \"geo\".\"sitios\""));
    }
}
