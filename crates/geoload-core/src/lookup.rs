//! Read-only queries over loaded layers.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::ident::{PRIMARY_KEY_COLUMN, TARGET_GEOMETRY_COLUMN, quote_ident, sanitize};
use crate::types::TableRef;

/// Features returned by an overlap query unless limited otherwise.
pub const DEFAULT_OVERLAP_LIMIT: i64 = 50;

/// Administrative level of a boundary code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminLevel {
    Region,
    Province,
    Commune,
}

impl AdminLevel {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            AdminLevel::Region => "region",
            AdminLevel::Province => "province",
            AdminLevel::Commune => "commune",
        }
    }

    /// The level a code of this level is filtered by.
    #[must_use]
    pub fn parent(&self) -> Option<AdminLevel> {
        match self {
            AdminLevel::Region => None,
            AdminLevel::Province => Some(AdminLevel::Region),
            AdminLevel::Commune => Some(AdminLevel::Province),
        }
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "region" => Ok(AdminLevel::Region),
            "province" => Ok(AdminLevel::Province),
            "commune" => Ok(AdminLevel::Commune),
            other => Err(format!(
                "unknown level '{other}', expected region, province or commune"
            )),
        }
    }
}

/// Distinct codes of one level, optionally filtered by a parent code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeQuery {
    pub sql: String,
    /// Bound to `$1` when present.
    pub parent: Option<String>,
}

/// Boundary table and the code column of each level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLookup {
    pub table: TableRef,
    pub region_column: String,
    pub province_column: String,
    pub commune_column: String,
}

impl Default for CodeLookup {
    fn default() -> Self {
        Self {
            table: TableRef::new("public", "admin_boundaries"),
            region_column: "cod_region".to_string(),
            province_column: "cod_provincia".to_string(),
            commune_column: "cod_comuna".to_string(),
        }
    }
}

impl CodeLookup {
    #[must_use]
    pub fn with_table(mut self, table: TableRef) -> Self {
        self.table = table;
        self
    }

    #[must_use]
    pub fn with_columns(mut self, region: &str, province: &str, commune: &str) -> Self {
        self.region_column = sanitize(region);
        self.province_column = sanitize(province);
        self.commune_column = sanitize(commune);
        self
    }

    #[must_use]
    pub fn column(&self, level: AdminLevel) -> &str {
        match level {
            AdminLevel::Region => &self.region_column,
            AdminLevel::Province => &self.province_column,
            AdminLevel::Commune => &self.commune_column,
        }
    }

    /// Builds the query for `level`. Codes are compared and returned as text.
    /// Regions ignore `parent`; a missing parent lists every code of the level.
    #[must_use]
    pub fn query(&self, level: AdminLevel, parent: Option<&str>) -> CodeQuery {
        let column = quote_ident(self.column(level));
        let mut sql = format!(
            "SELECT DISTINCT {column}::text AS code FROM {} WHERE {column} IS NOT NULL",
            self.table.quoted()
        );
        let parent = match (level.parent(), parent) {
            (Some(parent_level), Some(code)) => {
                sql.push_str(&format!(
                    " AND {}::text = $1",
                    quote_ident(self.column(parent_level))
                ));
                Some(code.to_string())
            },
            _ => None,
        };
        sql.push_str(" ORDER BY 1");
        CodeQuery { sql, parent }
    }
}

/// A feature overlapping a hexagon, with the shared area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapFeature {
    pub gid: i64,
    pub area: f64,
    /// Every other column of the feature row.
    pub properties: serde_json::Value,
}

/// An overlap query ready to run: `$1` is the hexagon gid, `$2` the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapRequest {
    pub sql: String,
    pub hex_gid: i64,
    pub limit: i64,
}

/// Features intersecting one hexagon of a grid, largest overlap first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapQuery {
    pub features: TableRef,
    pub hexagons: TableRef,
}

impl Default for OverlapQuery {
    fn default() -> Self {
        Self {
            features: TableRef::new("public", "formaciones"),
            hexagons: TableRef::new("public", "hex5km"),
        }
    }
}

impl OverlapQuery {
    #[must_use]
    pub fn new(features: TableRef, hexagons: TableRef) -> Self {
        Self { features, hexagons }
    }

    /// A non-positive limit falls back to [`DEFAULT_OVERLAP_LIMIT`].
    #[must_use]
    pub fn request(&self, hex_gid: i64, limit: i64) -> OverlapRequest {
        let gid = quote_ident(PRIMARY_KEY_COLUMN);
        let geom = quote_ident(TARGET_GEOMETRY_COLUMN);
        let sql = format!(
            "SELECT f.{gid}::bigint AS gid, \
             ST_Area(ST_Intersection(f.{geom}, h.{geom}))::double precision AS area, \
             (to_jsonb(f) - '{TARGET_GEOMETRY_COLUMN}' - '{PRIMARY_KEY_COLUMN}')::text AS properties \
             FROM {} AS f JOIN {} AS h ON ST_Intersects(f.{geom}, h.{geom}) \
             WHERE h.{gid} = $1 ORDER BY area DESC LIMIT $2",
            self.features.quoted(),
            self.hexagons.quoted()
        );
        OverlapRequest {
            sql,
            hex_gid,
            limit: if limit > 0 { limit } else { DEFAULT_OVERLAP_LIMIT },
        }
    }
}
