//! Data types shared by the ingestion stages.

use std::fmt;
use std::str::FromStr;

use crate::ident::{qualified_name, sanitize};
use crate::type_mapping::{PgType, SqlValue};

/// `schema.table` reference with sanitized parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    /// Builds a reference, sanitizing both parts.
    #[must_use]
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            schema: sanitize(schema),
            table: sanitize(table),
        }
    }

    /// Parses `schema.table`, defaulting the schema to `public`.
    #[must_use]
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, table)) => Self::new(schema, table),
            None => Self::new("public", qualified),
        }
    }

    /// Quoted `"schema"."table"` for SQL.
    #[must_use]
    pub fn quoted(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep existing rows and add the new ones.
    #[default]
    Append,
    /// Drop the table (with dependents) and recreate it.
    Replace,
}

impl WriteMode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Replace => "replace",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "replace" => Ok(WriteMode::Replace),
            other => Err(format!("unknown write mode '{other}', expected append or replace")),
        }
    }
}

/// Dimensional family of a geometry, used to pick what `ST_CollectionExtract`
/// keeps from a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryFamily {
    Point,
    Curve,
    Surface,
}

impl GeometryFamily {
    /// `ST_CollectionExtract` type argument: 1 points, 2 lines, 3 polygons.
    #[must_use]
    pub fn extract_code(&self) -> u8 {
        match self {
            GeometryFamily::Point => 1,
            GeometryFamily::Curve => 2,
            GeometryFamily::Surface => 3,
        }
    }

    /// Family of a PostGIS type name (`POINT`, `MULTIPOLYGON`, ...).
    #[must_use]
    pub fn of_type_name(type_name: &str) -> Option<Self> {
        match type_name.to_ascii_uppercase().as_str() {
            "POINT" | "MULTIPOINT" => Some(GeometryFamily::Point),
            "LINESTRING" | "MULTILINESTRING" => Some(GeometryFamily::Curve),
            "POLYGON" | "MULTIPOLYGON" => Some(GeometryFamily::Surface),
            _ => None,
        }
    }
}

/// A typed attribute column of the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub pg_type: PgType,
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: impl Into<String>, pg_type: PgType) -> Self {
        Self {
            name: name.into(),
            pg_type,
        }
    }
}

/// The table a dataset is loaded into.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTable {
    pub table: TableRef,
    /// Attribute columns in load order, `gid` and `geom` excluded.
    pub columns: Vec<ColumnDef>,
    pub geometry_column: String,
    /// Declared PostGIS geometry type (`POINT`, `MULTIPOLYGON`, `GEOMETRY`, ...).
    pub geometry_type: String,
    pub srid: i32,
}

/// One row ready for insertion: a value per attribute column and the
/// geometry as WKB.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRow {
    pub values: Vec<SqlValue>,
    pub wkb: Option<Vec<u8>>,
}

/// Validity counts of a geometry column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidityStats {
    pub total: u64,
    pub null: u64,
    pub valid: u64,
    pub invalid: u64,
}

impl fmt::Display for ValidityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} null={} valid={} invalid={}",
            self.total, self.null, self.valid, self.invalid
        )
    }
}

/// Result of processing one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Ok,
    Skip,
    Error,
}

impl IngestStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            IngestStatus::Ok => "OK",
            IngestStatus::Skip => "SKIP",
            IngestStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and message for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub source: String,
    pub status: IngestStatus,
    pub message: String,
    /// Destination table, once it is known.
    pub table: Option<TableRef>,
    pub rows: u64,
}

impl IngestOutcome {
    #[must_use]
    pub fn new(source: impl Into<String>, status: IngestStatus, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status,
            message: message.into(),
            table: None,
            rows: 0,
        }
    }
}

/// Aggregate of all outcomes of a run.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestSummary {
    pub fn push(&mut self, outcome: IngestOutcome) {
        self.outcomes.push(outcome);
    }

    #[must_use]
    pub fn count(&self, status: IngestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// True when any file ended in ERROR.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count(IngestStatus::Error) > 0
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary: OK={}, SKIP={}, ERROR={}",
            self.count(IngestStatus::Ok),
            self.count(IngestStatus::Skip),
            self.count(IngestStatus::Error)
        )
    }
}
