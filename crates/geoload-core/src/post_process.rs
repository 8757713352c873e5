//! Derived projected geometry columns for known tables.

use log::{debug, info};

use crate::error::StoreResult;
use crate::ident::{TARGET_GEOMETRY_COLUMN, quote_ident, sanitize};
use crate::store::SpatialStore;
use crate::types::{IngestStatus, TableRef};

/// Table whose web-mercator column is derived unless configured otherwise.
pub const DEFAULT_POST_PROCESS_TABLE: &str = "hex5km";

/// Adds `column geometry(geometry_type, srid)` to tables named `table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessRule {
    pub table: String,
    pub column: String,
    pub geometry_type: String,
    pub srid: i32,
}

impl PostProcessRule {
    #[must_use]
    pub fn new(table: &str, column: &str, geometry_type: &str, srid: i32) -> Self {
        Self {
            table: sanitize(table),
            column: sanitize(column),
            geometry_type: geometry_type.to_ascii_uppercase(),
            srid,
        }
    }

    /// `geom_3857 geometry(MULTIPOLYGON,3857)` on `table`.
    #[must_use]
    pub fn web_mercator(table: &str) -> Self {
        Self::new(table, "geom_3857", "MULTIPOLYGON", 3857)
    }

    fn is_multi(&self) -> bool {
        self.geometry_type.starts_with("MULTI")
    }
}

/// The set of post-process rules, matched by table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessRules {
    rules: Vec<PostProcessRule>,
}

impl Default for PostProcessRules {
    fn default() -> Self {
        Self {
            rules: vec![PostProcessRule::web_mercator(DEFAULT_POST_PROCESS_TABLE)],
        }
    }
}

impl PostProcessRules {
    /// No rules: every table is skipped.
    #[must_use]
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// A web-mercator rule for each table name.
    #[must_use]
    pub fn web_mercator<S: AsRef<str>>(tables: &[S]) -> Self {
        Self {
            rules: tables
                .iter()
                .map(|t| PostProcessRule::web_mercator(t.as_ref()))
                .collect(),
        }
    }

    /// First rule recognizing `table`.
    #[must_use]
    pub fn for_table(&self, table: &str) -> Option<&PostProcessRule> {
        let table = sanitize(table);
        self.rules.iter().find(|r| r.table == table)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The statements that derive a projected column, run in this order in one
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionPlan {
    pub table: TableRef,
    pub rule: PostProcessRule,
    pub add_column: String,
    /// Only fills rows whose derived value is still null.
    pub backfill: String,
    pub create_index: String,
    pub analyze: String,
}

impl ProjectionPlan {
    #[must_use]
    pub fn statements(&self) -> [&str; 4] {
        [
            &self.add_column,
            &self.backfill,
            &self.create_index,
            &self.analyze,
        ]
    }
}

#[must_use]
pub fn plan_projection(table: &TableRef, rule: &PostProcessRule) -> ProjectionPlan {
    let quoted = table.quoted();
    let column = quote_ident(&rule.column);
    let geom = quote_ident(TARGET_GEOMETRY_COLUMN);
    let transformed = if rule.is_multi() {
        format!("ST_Multi(ST_Transform({geom}, {}))", rule.srid)
    } else {
        format!("ST_Transform({geom}, {})", rule.srid)
    };
    let index = sanitize(&format!("{}_{}_gix", table.table, rule.column));

    ProjectionPlan {
        table: table.clone(),
        rule: rule.clone(),
        add_column: format!(
            "ALTER TABLE {quoted} ADD COLUMN IF NOT EXISTS {column} geometry({},{})",
            rule.geometry_type, rule.srid
        ),
        backfill: format!(
            "UPDATE {quoted} SET {column} = {transformed} WHERE {column} IS NULL AND {geom} IS NOT NULL"
        ),
        create_index: format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} USING GIST ({column})",
            quote_ident(&index)
        ),
        analyze: format!("ANALYZE {quoted}"),
    }
}

/// Derives the projected column for `table` if a rule recognizes it.
///
/// Returns SKIP when no rule matches or the table does not exist; neither
/// case touches the database beyond the existence check.
///
/// # Errors
///
/// Returns the store error of the failing statement; nothing is committed.
pub async fn post_process(
    store: &dyn SpatialStore,
    table: &TableRef,
    rules: &PostProcessRules,
) -> StoreResult<(IngestStatus, String)> {
    let Some(rule) = rules.for_table(&table.table) else {
        debug!("No post-process rule for {table}");
        return Ok((
            IngestStatus::Skip,
            format!("no post-process rule for {table}"),
        ));
    };
    if !store.table_exists(table).await? {
        return Ok((
            IngestStatus::Skip,
            format!("table {table} does not exist"),
        ));
    }

    let plan = plan_projection(table, rule);
    let filled = store.derive_projected_column(&plan).await?;
    info!(
        "Derived {}.{} (EPSG:{}) for {filled} rows",
        table, rule.column, rule.srid
    );
    Ok((
        IngestStatus::Ok,
        format!("{} derived for {filled} rows", rule.column),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule() {
        let rules = PostProcessRules::default();
        let rule = rules.for_table("HEX5KM").unwrap();
        assert_eq!(rule.column, "geom_3857");
        assert_eq!(rule.geometry_type, "MULTIPOLYGON");
        assert_eq!(rule.srid, 3857);
        assert!(rules.for_table("comunas").is_none());
        assert!(PostProcessRules::none().for_table("hex5km").is_none());
    }

    #[test]
    fn test_projection_plan() {
        let table = TableRef::new("public", "hex5km");
        let plan = plan_projection(&table, &PostProcessRule::web_mercator("hex5km"));

        assert_eq!(
            plan.add_column,
            "ALTER TABLE \"public\".\"hex5km\" ADD COLUMN IF NOT EXISTS \"geom_3857\" geometry(MULTIPOLYGON,3857)"
        );
        assert_eq!(
            plan.backfill,
            "UPDATE \"public\".\"hex5km\" SET \"geom_3857\" = ST_Multi(ST_Transform(\"geom\", 3857)) \
             WHERE \"geom_3857\" IS NULL AND \"geom\" IS NOT NULL"
        );
        assert_eq!(
            plan.create_index,
            "CREATE INDEX IF NOT EXISTS \"hex5km_geom_3857_gix\" ON \"public\".\"hex5km\" USING GIST (\"geom_3857\")"
        );
        assert_eq!(plan.statements()[3], "ANALYZE \"public\".\"hex5km\"");
    }

    #[test]
    fn test_single_type_rule_skips_multi() {
        let rule = PostProcessRule::new("sitios", "geom_utm", "Point", 32719);
        let plan = plan_projection(&TableRef::new("public", "sitios"), &rule);
        assert!(plan.backfill.contains("= ST_Transform(\"geom\", 32719)"));
        assert!(plan.add_column.ends_with("geometry(POINT,32719)"));
    }
}
