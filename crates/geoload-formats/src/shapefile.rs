//! ESRI Shapefile reading (`.shp` + `.shx` + `.dbf`, optional `.prj`).

use std::collections::HashSet;
use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use geo_types::Geometry;
use log::debug;
use shapefile::dbase::{self, FieldValue};
use shapefile::Shape;

use crate::crs::crs_from_wkt;
use crate::dataset::{AttributeValue, Crs, Dataset, Record, layer_name};
use crate::error::{FormatReadError, FormatResult, SourcePosition};

/// Reads a shapefile and its attribute table into a [`Dataset`].
///
/// Columns follow the DBF header order. Null shapes become records without
/// geometry. `N` fields declared without decimals are read as integers.
pub fn read_shapefile(path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let dbf_path = sibling(path, "dbf").ok_or_else(|| FormatReadError::Parse {
        message: "missing .dbf attribute table".to_string(),
        position: None,
        context: Some(context.clone()),
    })?;

    let columns: Vec<String> = dbase::Reader::from_path(&dbf_path)
        .map_err(|e| FormatReadError::parse(e.to_string(), dbf_path.display().to_string()))?
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .filter(|name| name != "DeletionFlag")
        .collect();
    let integer_columns = integer_columns(&dbf_path)?;

    let mut reader = shapefile::Reader::from_path(path)
        .map_err(|e| FormatReadError::parse(e.to_string(), context.clone()))?;

    let mut dataset = Dataset::new(layer_name(path), path).with_crs(read_prj(path)?);
    for (idx, item) in reader.iter_shapes_and_records().enumerate() {
        let position = Some(SourcePosition::record(idx as u64 + 1));
        let (shape, mut record) = item.map_err(|e| FormatReadError::Parse {
            message: e.to_string(),
            position: position.clone(),
            context: Some(context.clone()),
        })?;

        let geometry = shape_to_geometry(shape).map_err(|message| FormatReadError::Parse {
            message,
            position,
            context: Some(context.clone()),
        })?;
        let values = columns
            .iter()
            .map(|name| {
                record.remove(name).map_or(AttributeValue::Null, |value| {
                    field_to_attribute(value, integer_columns.contains(name))
                })
            })
            .collect();
        dataset.records.push(Record { values, geometry });
    }
    dataset.columns = columns;

    debug!(
        "Read {} shapes from {} ({} columns)",
        dataset.len(),
        context,
        dataset.columns.len()
    );
    Ok(dataset)
}

fn shape_to_geometry(shape: Shape) -> Result<Option<Geometry<f64>>, String> {
    if matches!(shape, Shape::NullShape) {
        return Ok(None);
    }
    Geometry::<f64>::try_from(shape)
        .map(Some)
        .map_err(|e| format!("unsupported shape: {e}"))
}

/// Names of the `N` fields whose descriptor declares zero decimal places.
///
/// The `dbase` reader keeps the decimal count private, so the field
/// descriptors are read straight from the `.dbf` header: 32-byte records
/// after the 32-byte file header, terminated by `0x0D`.
fn integer_columns(dbf_path: &Path) -> FormatResult<HashSet<String>> {
    let bytes =
        std::fs::read(dbf_path).map_err(|e| FormatReadError::io(e, dbf_path.display().to_string()))?;
    let header_len = bytes
        .get(8..10)
        .map_or(0, |raw| usize::from(u16::from_le_bytes([raw[0], raw[1]])));
    let end = header_len.min(bytes.len());

    let mut columns = HashSet::new();
    let mut offset = 32;
    while offset + 32 <= end && bytes[offset] != 0x0D {
        let descriptor = &bytes[offset..offset + 32];
        if descriptor[11] == b'N' && descriptor[17] == 0 {
            let name = String::from_utf8_lossy(&descriptor[..11])
                .trim_matches(char::from(0))
                .to_string();
            columns.insert(name);
        }
        offset += 32;
    }
    Ok(columns)
}

/// Integral values that fit in `i64`.
fn as_integer(n: f64) -> Option<i64> {
    (n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
}

fn field_to_attribute(value: FieldValue, integer: bool) -> AttributeValue {
    match value {
        FieldValue::Numeric(Some(n)) if integer => {
            as_integer(n).map_or(AttributeValue::Float(n), AttributeValue::Int)
        },
        FieldValue::Character(Some(text)) | FieldValue::Memo(text) => {
            let trimmed = text.trim_end();
            if trimmed.is_empty() {
                AttributeValue::Null
            } else {
                AttributeValue::Text(trimmed.to_string())
            }
        },
        FieldValue::Numeric(Some(n)) | FieldValue::Currency(n) | FieldValue::Double(n) => {
            AttributeValue::Float(n)
        },
        FieldValue::Float(Some(n)) => AttributeValue::Float(f64::from(n)),
        FieldValue::Integer(n) => AttributeValue::Int(i64::from(n)),
        FieldValue::Logical(Some(b)) => AttributeValue::Bool(b),
        FieldValue::Date(Some(date)) => {
            NaiveDate::from_ymd_opt(date.year() as i32, u32::from(date.month()), u32::from(date.day()))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map_or(AttributeValue::Null, AttributeValue::DateTime)
        },
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => AttributeValue::Null,
        other => AttributeValue::Text(format!("{other:?}")),
    }
}

fn read_prj(path: &Path) -> FormatResult<Option<Crs>> {
    let Some(prj) = sibling(path, "prj") else {
        return Ok(None);
    };
    let bytes = std::fs::read(&prj).map_err(|e| FormatReadError::io(e, prj.display().to_string()))?;
    let wkt = String::from_utf8_lossy(&bytes);
    if wkt.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(crs_from_wkt(&wkt)))
}

/// Finds a sidecar file next to `path`, trying lower- and upper-case extensions.
fn sibling(path: &Path, extension: &str) -> Option<PathBuf> {
    [extension.to_ascii_lowercase(), extension.to_ascii_uppercase()]
        .into_iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}
