//! SQL identifier sanitizing and column name mapping.

use std::collections::HashSet;
use std::path::Path;

use geoload_formats::GEOMETRY_COLUMN;

/// PostgreSQL truncates identifiers longer than this.
pub const MAX_IDENT_LEN: usize = 63;

/// Primary key column of every target table.
pub const PRIMARY_KEY_COLUMN: &str = "gid";

/// Geometry column of every target table.
pub const TARGET_GEOMETRY_COLUMN: &str = "geom";

/// Turns arbitrary text into a safe, lower-case PostgreSQL identifier.
///
/// Runs of characters outside `[a-z0-9_]` become a single `_`, repeated
/// underscores collapse, leading and trailing underscores are stripped and
/// the result is cut to 63 characters. An empty result becomes `layer`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let keep = ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_';
        let ch = if keep { ch } else { '_' };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }

    let trimmed = out.trim_matches('_');
    let truncated = &trimmed[..trimmed.len().min(MAX_IDENT_LEN)];
    let result = truncated.trim_end_matches('_');
    if result.is_empty() {
        "layer".to_string()
    } else {
        result.to_string()
    }
}

/// Double-quotes an identifier for use in SQL.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`.
#[must_use]
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Destination table name for a file.
///
/// An explicit override wins; otherwise the prefix is joined to the
/// sanitized file stem and the whole is sanitized again.
#[must_use]
pub fn table_name_for(path: &Path, prefix: &str, table_override: Option<&str>) -> String {
    if let Some(table) = table_override {
        return sanitize(table);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize(&format!("{prefix}{}", sanitize(&stem)))
}

/// Ordered source → target column renames for one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, String)>,
}

impl ColumnMapping {
    /// `(source, target)` pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(s, t)| (s.as_str(), t.as_str()))
    }

    /// Target names in source order.
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, t)| t.as_str()).collect()
    }

    /// `(source index, target)` of the attribute columns; the geometry
    /// marker is skipped.
    pub fn attributes(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, (_, target))| target.as_str() != GEOMETRY_COLUMN)
            .map(|(index, (_, target))| (index, target.as_str()))
    }

    #[must_use]
    pub fn target_for(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, t)| t.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the column mapping for a layer's attribute names.
///
/// The literal geometry marker `geometry` is kept. Anything that sanitizes to
/// `geometry` becomes `attr_geometry`; `gid` and `geom` get a `src_` prefix.
/// Duplicates take `_2`, `_3`, ... in first-seen order.
#[must_use]
pub fn normalize_columns<S: AsRef<str>>(names: &[S]) -> ColumnMapping {
    let mut used = HashSet::new();
    let mut entries = Vec::with_capacity(names.len());

    for name in names {
        let name = name.as_ref();
        let base = if name == GEOMETRY_COLUMN {
            GEOMETRY_COLUMN.to_string()
        } else {
            match sanitize(name).as_str() {
                GEOMETRY_COLUMN => "attr_geometry".to_string(),
                reserved @ (PRIMARY_KEY_COLUMN | TARGET_GEOMETRY_COLUMN) => format!("src_{reserved}"),
                other => other.to_string(),
            }
        };

        let mut candidate = base.clone();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = with_suffix(&base, n);
            n += 1;
        }
        used.insert(candidate.clone());
        entries.push((name.to_string(), candidate));
    }

    ColumnMapping { entries }
}

fn with_suffix(base: &str, n: usize) -> String {
    let suffix = format!("_{n}");
    let room = MAX_IDENT_LEN - suffix.len();
    let head = base[..base.len().min(room)].trim_end_matches('_');
    format!("{head}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid_ident(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_IDENT_LEN
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize("Nombre Comuna"), "nombre_comuna");
        assert_eq!(sanitize("Área (km2)"), "rea_km2");
        assert_eq!(sanitize("__a--b__"), "a_b");
        assert_eq!(sanitize("!!!"), "layer");
        assert_eq!(sanitize(""), "layer");
    }

    #[test]
    fn test_sanitize_truncates_and_is_idempotent() {
        let long = format!("{}_{}", "a".repeat(62), "b".repeat(10));
        let once = sanitize(&long);
        assert_eq!(once, "a".repeat(62));
        assert_eq!(sanitize(&once), once);

        for raw in ["Área (km2)", "  X  Y  ", "COD_REGIÓN", "123abc", "ñandú"] {
            let once = sanitize(raw);
            assert_eq!(sanitize(&once), once);
            assert!(is_valid_ident(&once));
        }
    }

    #[test]
    fn test_normalize_columns_scenario() {
        let mapping = normalize_columns(&["ID", "Nombre", "Área (km2)", "id"]);
        assert_eq!(mapping.targets(), vec!["id", "nombre", "rea_km2", "id_2"]);
        assert_eq!(mapping.target_for("Área (km2)"), Some("rea_km2"));
    }

    #[test]
    fn test_normalize_columns_reserved_names() {
        let mapping = normalize_columns(&["geometry", "Geometry", "GID", "geom", "src_gid"]);
        assert_eq!(
            mapping.targets(),
            vec!["geometry", "attr_geometry", "src_gid", "src_geom", "src_gid_2"]
        );
        let attributes: Vec<(usize, &str)> = mapping.attributes().collect();
        assert_eq!(attributes[0], (1, "attr_geometry"));
        assert_eq!(attributes.len(), 4);
    }

    #[test]
    fn test_normalize_columns_invariants() {
        let long = "x".repeat(80);
        let names = vec![
            long.clone(),
            long.clone(),
            long,
            "gid".to_string(),
            "geom".to_string(),
            "%%%".to_string(),
            "layer".to_string(),
        ];
        let mapping = normalize_columns(&names);
        let targets = mapping.targets();

        let unique: HashSet<_> = targets.iter().collect();
        assert_eq!(unique.len(), targets.len());
        for target in &targets {
            assert!(is_valid_ident(target), "{target}");
            assert!(*target != "gid" && *target != "geom");
        }
        assert_eq!(targets[1].len(), MAX_IDENT_LEN);
        assert!(targets[1].ends_with("_2"));
        assert_eq!(targets[6], "layer_2");
    }

    #[test]
    fn test_table_name_for() {
        let path = Path::new("/data/Comunas de Chile.shp");
        assert_eq!(table_name_for(path, "", None), "comunas_de_chile");
        assert_eq!(table_name_for(path, "IDE ", None), "ide_comunas_de_chile");
        assert_eq!(table_name_for(path, "x_", Some("Hex 5km")), "hex_5km");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("hex5km"), "\"hex5km\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified_name("public", "t"), "\"public\".\"t\"");
    }
}
