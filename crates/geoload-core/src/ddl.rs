//! DDL synthesis for the target table.

use geoload_formats::Dataset;

use crate::ident::{ColumnMapping, PRIMARY_KEY_COLUMN, TARGET_GEOMETRY_COLUMN, quote_ident, sanitize};
use crate::type_mapping::{ValueDomain, pg_type};
use crate::types::{ColumnDef, TableRef, TargetTable};

/// The statements that create a target table, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPlan {
    pub target: TargetTable,
    pub statements: Vec<String>,
}

/// Builds the DDL for `schema.table`.
///
/// Emits `CREATE SCHEMA IF NOT EXISTS`, `CREATE TABLE IF NOT EXISTS` with a
/// `gid BIGSERIAL` primary key, the attribute columns in order and
/// `geom geometry(<type>,<srid>)` last, then the GiST index
/// `<table>_geom_gix`. Every identifier is sanitized and quoted.
#[must_use]
pub fn build_ddl(
    schema: &str,
    table: &str,
    columns: &[ColumnDef],
    geometry_type: &str,
    srid: i32,
) -> SchemaPlan {
    let table_ref = TableRef::new(schema, table);
    let columns: Vec<ColumnDef> = columns
        .iter()
        .map(|c| ColumnDef::new(sanitize(&c.name), c.pg_type))
        .collect();
    let geometry_type = geometry_type.replace(' ', "").to_ascii_uppercase();

    let mut definitions = vec![format!(
        "    {} BIGSERIAL PRIMARY KEY",
        quote_ident(PRIMARY_KEY_COLUMN)
    )];
    definitions.extend(
        columns
            .iter()
            .map(|c| format!("    {} {}", quote_ident(&c.name), c.pg_type.as_sql())),
    );
    definitions.push(format!(
        "    {} geometry({geometry_type},{srid})",
        quote_ident(TARGET_GEOMETRY_COLUMN)
    ));

    let index = sanitize(&format!("{}_{TARGET_GEOMETRY_COLUMN}_gix", table_ref.table));
    let statements = vec![
        format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(&table_ref.schema)
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            table_ref.quoted(),
            definitions.join(",\n")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIST ({})",
            quote_ident(&index),
            table_ref.quoted(),
            quote_ident(TARGET_GEOMETRY_COLUMN)
        ),
    ];

    SchemaPlan {
        target: TargetTable {
            table: table_ref,
            columns,
            geometry_column: TARGET_GEOMETRY_COLUMN.to_string(),
            geometry_type,
            srid,
        },
        statements,
    }
}

/// Infers a column type for every mapped attribute of `dataset` and builds
/// the DDL for `table`.
#[must_use]
pub fn synthesize(
    dataset: &Dataset,
    mapping: &ColumnMapping,
    table: &TableRef,
    geometry_type: &str,
    srid: i32,
) -> SchemaPlan {
    let columns: Vec<ColumnDef> = mapping
        .attributes()
        .map(|(index, target)| {
            let domain = ValueDomain::infer(dataset.column_values(index));
            ColumnDef::new(target, pg_type(domain))
        })
        .collect();
    build_ddl(&table.schema, &table.table, &columns, geometry_type, srid)
}

impl SchemaPlan {
    /// The DDL as a script, one statement per paragraph.
    #[must_use]
    pub fn render(&self) -> String {
        let mut script = self
            .statements
            .iter()
            .map(|s| format!("{s};"))
            .collect::<Vec<_>>()
            .join("\n\n");
        script.push('\n');
        script
    }

    /// `DROP TABLE IF EXISTS ... CASCADE` for replace mode.
    #[must_use]
    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", self.target.table.quoted())
    }

    /// File name of the DDL audit artifact.
    #[must_use]
    pub fn artifact_name(&self) -> String {
        format!("{}.{}.sql", self.target.table.schema, self.target.table.table)
    }
}
