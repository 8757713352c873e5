//! In-database geometry repair.
//!
//! Repair runs in two phases. The first makes invalid geometries valid and
//! fits the result back into the declared column type. The second collapses
//! `GEOMETRYCOLLECTION` values in a generic `GEOMETRY` column down to the
//! family the layer was meant to hold. Both phases only touch rows that need
//! them.

use std::fmt;

use log::{info, warn};

use crate::error::StoreResult;
use crate::geometry::GENERIC_GEOMETRY;
use crate::ident::{PRIMARY_KEY_COLUMN, quote_ident};
use crate::store::SpatialStore;
use crate::types::{GeometryFamily, TableRef, TargetTable, ValidityStats};

/// The two repair statements for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairPlan {
    pub table: TableRef,
    pub column: String,
    /// Phase 1: `ST_MakeValid` + snap, fitted to the column type.
    pub make_valid: String,
    /// Phase 2: collection extraction, only for generic columns with a known
    /// family.
    pub extract: Option<String>,
}

/// Rows touched by each phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairCounts {
    pub made_valid: u64,
    pub extracted: u64,
}

/// What a repair run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub before: ValidityStats,
    pub after: ValidityStats,
    pub counts: RepairCounts,
}

impl RepairReport {
    /// Invalid geometries left after both phases.
    #[must_use]
    pub fn residual_invalid(&self) -> u64 {
        self.after.invalid
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repaired {}, extracted {}",
            self.counts.made_valid, self.counts.extracted
        )?;
        if self.after.invalid > 0 {
            write!(f, ", {} still invalid", self.after.invalid)?;
        }
        Ok(())
    }
}

/// Counts total, null, valid and invalid geometries of `column`.
///
/// The result has the columns `total`, `null_count`, `valid` and `invalid`,
/// all `BIGINT`.
#[must_use]
pub fn validity_sql(table: &TableRef, column: &str) -> String {
    let g = quote_ident(column);
    format!(
        "SELECT COUNT(*) AS total, \
         COUNT(*) FILTER (WHERE {g} IS NULL) AS null_count, \
         COUNT(*) FILTER (WHERE {g} IS NOT NULL AND ST_IsValid({g})) AS valid, \
         COUNT(*) FILTER (WHERE {g} IS NOT NULL AND NOT ST_IsValid({g})) AS invalid \
         FROM {}",
        table.quoted()
    )
}

/// Builds the repair statements for a loaded table.
///
/// `family` is the family the layer was normalized to; it only matters for
/// generic `GEOMETRY` columns, where an unknown family leaves collections
/// untouched.
#[must_use]
pub fn plan_repair(
    target: &TargetTable,
    tolerance: f64,
    family: Option<GeometryFamily>,
) -> RepairPlan {
    let table = target.table.quoted();
    let g = quote_ident(&target.geometry_column);
    let gid = quote_ident(PRIMARY_KEY_COLUMN);
    let needs_repair = format!("{g} IS NOT NULL AND NOT ST_IsValid({g})");
    let fixed = if tolerance > 0.0 {
        format!("ST_SnapToGrid(ST_MakeValid({g}), {tolerance})")
    } else {
        format!("ST_MakeValid({g})")
    };

    let declared = target.geometry_type.to_ascii_uppercase();
    let make_valid = match GeometryFamily::of_type_name(&declared) {
        Some(fam) if declared.starts_with("MULTI") => format!(
            "UPDATE {table} SET {g} = ST_Multi(ST_CollectionExtract({fixed}, {})) WHERE {needs_repair}",
            fam.extract_code()
        ),
        // Single-part columns only take a repair that yields exactly one part.
        Some(fam) => format!(
            "WITH fixed AS (\
             SELECT {gid} AS id, ST_CollectionExtract({fixed}, {}) AS g \
             FROM {table} WHERE {needs_repair}) \
             UPDATE {table} AS t SET {g} = ST_GeometryN(fixed.g, 1) \
             FROM fixed WHERE t.{gid} = fixed.id AND ST_NumGeometries(fixed.g) = 1",
            fam.extract_code()
        ),
        None => format!("UPDATE {table} SET {g} = {fixed} WHERE {needs_repair}"),
    };

    let extract = match family {
        Some(fam) if declared == GENERIC_GEOMETRY => Some(format!(
            "UPDATE {table} SET {g} = ST_CollectionExtract({g}, {}) \
             WHERE {g} IS NOT NULL AND GeometryType({g}) = 'GEOMETRYCOLLECTION'",
            fam.extract_code()
        )),
        _ => None,
    };

    RepairPlan {
        table: target.table.clone(),
        column: target.geometry_column.clone(),
        make_valid,
        extract,
    }
}

/// Repairs the geometries of a freshly loaded table.
///
/// Validity is measured before and after. Invalid geometries that survive
/// are logged as a `RepairWarning` and reported, never raised.
///
/// # Errors
///
/// Returns the store error of the first failing statement; the repair
/// transaction is rolled back.
pub async fn repair(
    store: &dyn SpatialStore,
    target: &TargetTable,
    tolerance: f64,
    family: Option<GeometryFamily>,
) -> StoreResult<RepairReport> {
    let before = store
        .validity_stats(&target.table, &target.geometry_column)
        .await?;
    let plan = plan_repair(target, tolerance, family);
    let counts = store.repair_geometries(&plan).await?;
    let after = store
        .validity_stats(&target.table, &target.geometry_column)
        .await?;

    info!(
        "Repaired {}: before [{before}], after [{after}], {} made valid, {} extracted",
        target.table, counts.made_valid, counts.extracted
    );
    if after.invalid > 0 {
        warn!(
            "RepairWarning: {} invalid geometries remain in {}.{}",
            after.invalid, target.table, target.geometry_column
        );
    }

    Ok(RepairReport {
        before,
        after,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(geometry_type: &str) -> TargetTable {
        TargetTable {
            table: TableRef::new("public", "comunas"),
            columns: Vec::new(),
            geometry_column: "geom".to_string(),
            geometry_type: geometry_type.to_string(),
            srid: 4326,
        }
    }

    #[test]
    fn test_multi_column_repair() {
        let plan = plan_repair(&target("MULTIPOLYGON"), 1e-9, Some(GeometryFamily::Surface));
        assert_eq!(
            plan.make_valid,
            "UPDATE \"public\".\"comunas\" SET \"geom\" = ST_Multi(ST_CollectionExtract(\
             ST_SnapToGrid(ST_MakeValid(\"geom\"), 0.000000001), 3)) \
             WHERE \"geom\" IS NOT NULL AND NOT ST_IsValid(\"geom\")"
        );
        assert!(plan.extract.is_none());
    }

    #[test]
    fn test_single_column_keeps_single_part_results_only() {
        let plan = plan_repair(&target("LINESTRING"), 0.0, Some(GeometryFamily::Curve));
        assert!(plan.make_valid.starts_with("WITH fixed AS ("));
        assert!(plan.make_valid.contains("ST_CollectionExtract(ST_MakeValid(\"geom\"), 2)"));
        assert!(plan.make_valid.contains("ST_NumGeometries(fixed.g) = 1"));
        assert!(!plan.make_valid.contains("ST_SnapToGrid"));
    }

    #[test]
    fn test_generic_column_extracts_collections() {
        let plan = plan_repair(&target("GEOMETRY"), 1e-9, Some(GeometryFamily::Surface));
        assert!(!plan.make_valid.contains("ST_CollectionExtract"));
        let extract = plan.extract.unwrap();
        assert!(extract.contains("ST_CollectionExtract(\"geom\", 3)"));
        assert!(extract.contains("GeometryType(\"geom\") = 'GEOMETRYCOLLECTION'"));
    }

    #[test]
    fn test_generic_column_unknown_family() {
        let plan = plan_repair(&target("GEOMETRY"), 1e-9, None);
        assert!(plan.extract.is_none());
    }

    #[test]
    fn test_validity_sql() {
        let sql = validity_sql(&TableRef::new("public", "hex5km"), "geom");
        assert!(sql.starts_with("SELECT COUNT(*) AS total"));
        assert!(sql.contains("AS null_count"));
        assert!(sql.ends_with("FROM \"public\".\"hex5km\""));
    }

    #[test]
    fn test_report_display() {
        let report = RepairReport {
            before: ValidityStats::default(),
            after: ValidityStats {
                total: 4,
                null: 0,
                valid: 3,
                invalid: 1,
            },
            counts: RepairCounts {
                made_valid: 2,
                extracted: 0,
            },
        };
        assert_eq!(report.to_string(), "repaired 2, extracted 0, 1 still invalid");
        assert_eq!(report.residual_invalid(), 1);
    }
}
