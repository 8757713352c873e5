//! GeoPackage reading through `rusqlite`.
//!
//! Only the first feature table (alphabetical) is read. A GeoPackage holding
//! just attribute tables yields a dataset without a geometry column so the
//! caller can reject it with a schema error instead of a read error.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use geo_types::Geometry;
use geozero::ToGeo;
use geozero::wkb::Wkb;
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::dataset::{AttributeValue, Crs, Dataset, Record};
use crate::error::{FormatReadError, FormatResult, SourcePosition};

const GPKG_MAGIC: &[u8; 2] = b"GP";

/// How a column's values should be interpreted, from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Boolean,
    Date,
    DateTime,
    Plain,
}

impl Affinity {
    fn from_declared(declared: &str) -> Self {
        match declared.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" => Affinity::Boolean,
            "DATE" => Affinity::Date,
            "DATETIME" | "TIMESTAMP" => Affinity::DateTime,
            _ => Affinity::Plain,
        }
    }
}

struct LayerColumn {
    name: String,
    affinity: Affinity,
}

/// Reads the first feature table of a GeoPackage.
pub fn read_gpkg(path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| FormatReadError::parse(e.to_string(), context.clone()))?;

    let (table, data_type) = first_layer(&conn)
        .map_err(|e| FormatReadError::parse(e.to_string(), context.clone()))?
        .ok_or_else(|| {
            FormatReadError::parse("no feature or attribute tables in gpkg_contents", context.clone())
        })?;

    let geometry = if data_type == "features" {
        geometry_column(&conn, &table)?
    } else {
        None
    };
    let crs = match &geometry {
        Some((_, srs_id)) => srs_to_crs(&conn, *srs_id)?,
        None => None,
    };
    let geometry_name = geometry.map(|(name, _)| name);

    let columns = attribute_columns(&conn, &table, geometry_name.as_deref())?;

    let mut select: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
    if let Some(name) = &geometry_name {
        select.push(quote(name));
    }
    let sql = format!("SELECT {} FROM {}", select.join(", "), quote(&table));

    let mut dataset = Dataset::new(table.clone(), path).with_crs(crs);
    dataset.geometry_column = geometry_name.clone();
    dataset.columns = columns.iter().map(|c| c.name.clone()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut record_no = 0u64;
    while let Some(row) = rows.next()? {
        record_no += 1;
        let values = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| row.get_ref(idx).map(|v| convert_value(v, column.affinity)))
            .collect::<Result<Vec<_>, _>>()?;
        let geometry = if geometry_name.is_some() {
            match row.get_ref(columns.len())? {
                ValueRef::Blob(blob) => {
                    decode_gpkg_geometry(blob).map_err(|message| FormatReadError::Parse {
                        message,
                        position: Some(SourcePosition::record(record_no)),
                        context: Some(context.clone()),
                    })?
                },
                _ => None,
            }
        } else {
            None
        };
        dataset.records.push(Record { values, geometry });
    }

    debug!(
        "Read {} features from GeoPackage table {table} in {context}",
        dataset.len()
    );
    Ok(dataset)
}

fn first_layer(conn: &Connection) -> rusqlite::Result<Option<(String, String)>> {
    conn.query_row(
        "SELECT table_name, data_type FROM gpkg_contents \
         WHERE data_type IN ('features', 'attributes') \
         ORDER BY CASE data_type WHEN 'features' THEN 0 ELSE 1 END, table_name \
         LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn geometry_column(conn: &Connection, table: &str) -> FormatResult<Option<(String, i64)>> {
    Ok(conn
        .query_row(
            "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE table_name = ?1",
            [table],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn srs_to_crs(conn: &Connection, srs_id: i64) -> FormatResult<Option<Crs>> {
    // -1 and 0 are the "undefined" cartesian and geographic systems.
    if srs_id <= 0 {
        return Ok(None);
    }
    let found: Option<(String, i64, String)> = conn
        .query_row(
            "SELECT organization, organization_coordsys_id, definition \
             FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(found.map(|(organization, code, definition)| Crs {
        epsg: organization
            .eq_ignore_ascii_case("EPSG")
            .then(|| i32::try_from(code).ok())
            .flatten(),
        definition: Some(definition),
    }))
}

fn attribute_columns(
    conn: &Connection,
    table: &str,
    geometry: Option<&str>,
) -> FormatResult<Vec<LayerColumn>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let pk: i64 = row.get(5)?;
            Ok((name, declared, pk))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns
        .into_iter()
        // The integer primary key is the feature id, not an attribute.
        .filter(|(_, declared, pk)| !(*pk > 0 && declared.eq_ignore_ascii_case("INTEGER")))
        .filter(|(name, _, _)| Some(name.as_str()) != geometry)
        .map(|(name, declared, _)| LayerColumn {
            name,
            affinity: Affinity::from_declared(&declared),
        })
        .collect())
}

fn convert_value(value: ValueRef<'_>, affinity: Affinity) -> AttributeValue {
    match (value, affinity) {
        (ValueRef::Null, _) => AttributeValue::Null,
        (ValueRef::Integer(i), Affinity::Boolean) => AttributeValue::Bool(i != 0),
        (ValueRef::Integer(i), _) => AttributeValue::Int(i),
        (ValueRef::Real(f), _) => AttributeValue::Float(f),
        (ValueRef::Text(bytes), affinity) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match affinity {
                Affinity::Date => parse_date(&text)
                    .map_or(AttributeValue::Text(text), AttributeValue::DateTime),
                Affinity::DateTime => parse_datetime(&text)
                    .map_or(AttributeValue::Text(text), AttributeValue::DateTime),
                Affinity::Boolean | Affinity::Plain => AttributeValue::Text(text),
            }
        },
        (ValueRef::Blob(bytes), _) => {
            AttributeValue::Text(bytes.iter().map(|b| format!("{b:02x}")).collect())
        },
    }
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| parse_date(text))
}

/// Decodes a GeoPackage binary geometry (header + WKB).
///
/// Returns `Ok(None)` for geometries flagged empty.
pub fn decode_gpkg_geometry(blob: &[u8]) -> Result<Option<Geometry<f64>>, String> {
    if blob.len() < 8 || &blob[0..2] != GPKG_MAGIC {
        return Err("geometry blob is missing the GeoPackage header".to_string());
    }
    let flags = blob[3];
    if flags & 0b0001_0000 != 0 {
        return Ok(None);
    }
    let envelope_len = match (flags >> 1) & 0b111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => return Err(format!("invalid envelope indicator {other}")),
    };
    let start = 8 + envelope_len;
    let wkb = blob
        .get(start..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| "geometry blob ends before the WKB payload".to_string())?;

    Wkb(wkb.to_vec())
        .to_geo()
        .map(Some)
        .map_err(|e| format!("invalid WKB: {e}"))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::Point;
    use geozero::{CoordDimensions, ToWkb};

    fn gpkg_blob(geometry: &Geometry<f64>, srs_id: i32) -> Vec<u8> {
        let mut blob = vec![b'G', b'P', 0, 0b0000_0001];
        blob.extend_from_slice(&srs_id.to_le_bytes());
        blob.extend(geometry.to_wkb(CoordDimensions::xy()).unwrap());
        blob
    }

    #[test]
    fn decode_header_without_envelope() {
        let point: Geometry<f64> = Point::new(-70.65, -33.45).into();
        let decoded = decode_gpkg_geometry(&gpkg_blob(&point, 4326)).unwrap();
        assert_eq!(decoded, Some(point));
    }

    #[test]
    fn decode_empty_flag() {
        let blob = [b'G', b'P', 0, 0b0001_0001, 0, 0, 0, 0];
        assert_eq!(decode_gpkg_geometry(&blob).unwrap(), None);
    }

    #[test]
    fn decode_rejects_plain_wkb() {
        assert!(decode_gpkg_geometry(&[1, 1, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn boolean_affinity_converts_integers() {
        assert_eq!(
            convert_value(ValueRef::Integer(1), Affinity::Boolean),
            AttributeValue::Bool(true)
        );
        assert_eq!(
            convert_value(ValueRef::Integer(1), Affinity::Plain),
            AttributeValue::Int(1)
        );
    }

    #[test]
    fn datetime_affinity_parses_iso_text() {
        let value = convert_value(ValueRef::Text(b"2024-03-01T10:30:00Z"), Affinity::DateTime);
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(value, AttributeValue::DateTime(expected));
    }
}
