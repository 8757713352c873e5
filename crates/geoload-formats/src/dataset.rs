//! In-memory representation of a vector layer read from disk.
//!
//! Every reader produces a [`Dataset`]: an ordered column list plus records
//! whose values line up with that list. Formats with per-feature property
//! maps (GeoJSON, KML) resolve the column set once through
//! [`ColumnCollector`] so the rest of the pipeline only sees fixed-shape rows.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use geo_types::Geometry;

/// Name used for the geometry column of every reader.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// A single scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl AttributeValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => Ok(()),
            AttributeValue::Bool(value) => write!(f, "{value}"),
            AttributeValue::Int(value) => write!(f, "{value}"),
            AttributeValue::Float(value) => write!(f, "{value}"),
            AttributeValue::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            AttributeValue::Text(value) => f.write_str(value),
        }
    }
}

/// Coordinate reference system declared by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crs {
    /// EPSG code, when one could be resolved.
    pub epsg: Option<i32>,
    /// Raw definition as found in the source (WKT, URN, ...).
    pub definition: Option<String>,
}

impl Crs {
    #[must_use]
    pub fn epsg(code: i32) -> Self {
        Self {
            epsg: Some(code),
            definition: Some(format!("EPSG:{code}")),
        }
    }

    /// WGS 84 geographic coordinates, the default of GeoJSON and KML.
    #[must_use]
    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }
}

/// One feature: values in column order plus an optional geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<AttributeValue>,
    pub geometry: Option<Geometry<f64>>,
}

/// A tabular layer with one geometry per record.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Layer name (file stem, feature table name, KML document name).
    pub layer: String,
    /// File the layer was parsed from. Inside archives this is the extracted
    /// path, which no longer exists once the read returns.
    pub source: PathBuf,
    /// Attribute column names, in source order. Never includes the geometry.
    pub columns: Vec<String>,
    /// Name of the geometry column, `None` for attribute-only layers.
    pub geometry_column: Option<String>,
    pub crs: Option<Crs>,
    pub records: Vec<Record>,
}

impl Dataset {
    #[must_use]
    pub fn new(layer: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            layer: layer.into(),
            source: source.into(),
            columns: Vec::new(),
            geometry_column: Some(GEOMETRY_COLUMN.to_string()),
            crs: None,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.crs = crs;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of one column across all records.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &AttributeValue> {
        self.records.iter().filter_map(move |r| r.values.get(index))
    }

    /// Geometries of all records that have one.
    pub fn geometries(&self) -> impl Iterator<Item = &Geometry<f64>> {
        self.records.iter().filter_map(|r| r.geometry.as_ref())
    }
}

/// Layer name derived from a file path.
#[must_use]
pub fn layer_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Collects keyed features and resolves them into fixed-shape records.
///
/// Columns are ordered by first appearance across the whole layer; values
/// missing from a feature become [`AttributeValue::Null`]. A key repeated
/// within one feature gets its own column for each repeat, so the column list
/// may hold the same name more than once.
#[derive(Debug, Default)]
pub struct ColumnCollector {
    columns: Vec<String>,
    index: HashMap<(String, usize), usize>,
    pending: Vec<(Vec<(usize, AttributeValue)>, Option<Geometry<f64>>)>,
}

impl ColumnCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a column without a value, fixing its position.
    pub fn declare(&mut self, name: &str) -> usize {
        self.slot(name, 0)
    }

    fn slot(&mut self, name: &str, occurrence: usize) -> usize {
        let key = (name.to_string(), occurrence);
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.columns.len();
        self.columns.push(name.to_string());
        self.index.insert(key, idx);
        idx
    }

    pub fn push<I, K>(&mut self, properties: I, geometry: Option<Geometry<f64>>)
    where
        I: IntoIterator<Item = (K, AttributeValue)>,
        K: AsRef<str>,
    {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let values = properties
            .into_iter()
            .map(|(key, value)| {
                let key = key.as_ref();
                let occurrence = seen.entry(key.to_string()).or_insert(0);
                let idx = self.slot(key, *occurrence);
                *occurrence += 1;
                (idx, value)
            })
            .collect();
        self.pending.push((values, geometry));
    }

    /// Writes the collected columns and records into `dataset`.
    pub fn finish_into(self, dataset: &mut Dataset) {
        let width = self.columns.len();
        dataset.records = self
            .pending
            .into_iter()
            .map(|(values, geometry)| {
                let mut row = vec![AttributeValue::Null; width];
                for (idx, value) in values {
                    row[idx] = value;
                }
                Record {
                    values: row,
                    geometry,
                }
            })
            .collect();
        dataset.columns = self.columns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;

    #[test]
    fn collector_orders_columns_by_first_appearance() {
        let mut collector = ColumnCollector::new();
        collector.push(
            [("b", AttributeValue::Int(1)), ("a", AttributeValue::Int(2))],
            Some(Point::new(0.0, 0.0).into()),
        );
        collector.push(
            [
                ("c", AttributeValue::Text("x".into())),
                ("a", AttributeValue::Int(3)),
            ],
            None,
        );

        let mut dataset = Dataset::new("layer", "layer.geojson");
        collector.finish_into(&mut dataset);

        assert_eq!(dataset.columns, vec!["b", "a", "c"]);
        assert_eq!(
            dataset.records[0].values,
            vec![
                AttributeValue::Int(1),
                AttributeValue::Int(2),
                AttributeValue::Null
            ]
        );
        assert_eq!(
            dataset.records[1].values,
            vec![
                AttributeValue::Null,
                AttributeValue::Int(3),
                AttributeValue::Text("x".into())
            ]
        );
        assert!(dataset.records[1].geometry.is_none());
    }

    #[test]
    fn declared_columns_keep_their_slot() {
        let mut collector = ColumnCollector::new();
        collector.declare("name");
        collector.push([("other", AttributeValue::Bool(true))], None);

        let mut dataset = Dataset::new("layer", "layer.kml");
        collector.finish_into(&mut dataset);

        assert_eq!(dataset.columns, vec!["name", "other"]);
        assert_eq!(dataset.records[0].values[0], AttributeValue::Null);
    }

    #[test]
    fn repeated_keys_get_separate_columns() {
        let mut collector = ColumnCollector::new();
        collector.declare("name");
        collector.push(
            [
                ("name", AttributeValue::Text("Bosque".into())),
                ("name", AttributeValue::Text("nativo".into())),
            ],
            None,
        );
        collector.push([("name", AttributeValue::Text("Estepa".into()))], None);

        let mut dataset = Dataset::new("layer", "layer.kml");
        collector.finish_into(&mut dataset);

        assert_eq!(dataset.columns, vec!["name", "name"]);
        assert_eq!(
            dataset.records[0].values,
            vec![
                AttributeValue::Text("Bosque".into()),
                AttributeValue::Text("nativo".into())
            ]
        );
        assert_eq!(
            dataset.records[1].values,
            vec![AttributeValue::Text("Estepa".into()), AttributeValue::Null]
        );
    }

    #[test]
    fn layer_name_uses_file_stem() {
        assert_eq!(layer_name(Path::new("/tmp/comunas.shp")), "comunas");
    }
}
