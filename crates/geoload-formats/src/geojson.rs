//! `GeoJSON` parsing into a [`Dataset`].

use std::convert::TryInto;
use std::path::Path;

use geo_types::Geometry;
use geojson::{
    Feature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry, JsonObject, JsonValue,
};

use crate::crs::crs_from_srs_name;
use crate::dataset::{AttributeValue, ColumnCollector, Crs, Dataset, layer_name};
use crate::error::{FormatReadError, FormatResult, SourcePosition};

/// One feature before its properties are lined up into columns.
#[derive(Debug)]
struct FeatureRecord {
    properties: JsonObject,
    geometry: Option<Geometry<f64>>,
}

/// Reads a `.geojson`/`.json` file into a [`Dataset`].
///
/// The legacy `crs` member of a FeatureCollection is honoured; without it the
/// data is WGS 84 as RFC 7946 mandates.
pub fn read_geojson(path: &Path) -> FormatResult<Dataset> {
    let bytes =
        std::fs::read(path).map_err(|e| FormatReadError::io(e, path.display().to_string()))?;
    parse_geojson(&bytes, path)
}

/// Parses `GeoJSON` bytes; `path` names the layer and the error context.
pub fn parse_geojson(bytes: &[u8], path: &Path) -> FormatResult<Dataset> {
    let (records, crs) = parse_geojson_bytes(bytes, path.display().to_string())?;

    let mut dataset = Dataset::new(layer_name(path), path).with_crs(Some(crs));
    let mut collector = ColumnCollector::new();
    for record in records {
        let properties = record
            .properties
            .into_iter()
            .map(|(key, value)| (key, json_to_attribute(value)));
        collector.push(properties, record.geometry);
    }
    collector.finish_into(&mut dataset);
    Ok(dataset)
}

fn parse_geojson_bytes(
    bytes: &[u8],
    context: impl Into<String>,
) -> FormatResult<(Vec<FeatureRecord>, Crs)> {
    let context = context.into();
    let reader = std::io::Cursor::new(bytes);

    match GeoJson::from_reader(reader) {
        Ok(geojson) => {
            let crs = declared_crs(&geojson).unwrap_or_else(Crs::wgs84);
            Ok((geojson_to_records(geojson, &context)?, crs))
        },
        Err(primary_err) => {
            let primary_err_message = primary_err.to_string();
            match parse_geojson_sequence(bytes, &context) {
                Ok(records) => Ok((records, Crs::wgs84())),
                Err(sequence_err) => {
                    Err(combine_errors(&primary_err_message, &sequence_err, context))
                },
            }
        },
    }
}

fn declared_crs(geojson: &GeoJson) -> Option<Crs> {
    let GeoJson::FeatureCollection(collection) = geojson else {
        return None;
    };
    let name = collection
        .foreign_members
        .as_ref()?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    Some(crs_from_srs_name(name))
}

fn geojson_to_records(geojson: GeoJson, context: &str) -> FormatResult<Vec<FeatureRecord>> {
    match geojson {
        GeoJson::FeatureCollection(collection) => feature_collection_to_records(collection),
        GeoJson::Feature(feature) => Ok(vec![feature_to_record(feature)?]),
        GeoJson::Geometry(geometry) => {
            let geometry = convert_geometry(geometry, context)?;
            Ok(vec![FeatureRecord {
                properties: JsonObject::new(),
                geometry: Some(geometry),
            }])
        },
    }
}

fn feature_collection_to_records(collection: FeatureCollection) -> FormatResult<Vec<FeatureRecord>> {
    collection
        .features
        .into_iter()
        .map(feature_to_record)
        .collect()
}

fn feature_to_record(feature: Feature) -> FormatResult<FeatureRecord> {
    let geometry = match feature.geometry {
        Some(geometry) => Some(convert_geometry(geometry, "feature")?),
        None => None,
    };

    let properties = feature.properties.unwrap_or_default();

    Ok(FeatureRecord {
        properties,
        geometry,
    })
}

fn convert_geometry(geometry: GeoJsonGeometry, context: &str) -> FormatResult<Geometry<f64>> {
    geometry.try_into().map_err(|err| FormatReadError::Parse {
        message: format!("Failed to convert GeoJSON geometry: {err}"),
        position: None,
        context: Some(context.to_string()),
    })
}

fn parse_geojson_sequence(bytes: &[u8], context: &str) -> FormatResult<Vec<FeatureRecord>> {
    let mut records = Vec::new();
    for (line_idx, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_number = (line_idx + 1) as u64;
        let line = match std::str::from_utf8(raw_line) {
            Ok(line) => line.trim(),
            Err(err) => {
                return Err(FormatReadError::Parse {
                    message: format!("GeoJSON line is not valid UTF-8: {err}"),
                    position: Some(SourcePosition::line(line_number)),
                    context: Some(context.to_string()),
                });
            },
        };

        if line.is_empty() {
            continue;
        }

        let geojson = line
            .parse::<GeoJson>()
            .map_err(|err| FormatReadError::Parse {
                message: format!("Failed to parse GeoJSON feature: {err}"),
                position: Some(SourcePosition::line(line_number)),
                context: Some(context.to_string()),
            })?;

        let mut parsed = geojson_to_records(geojson, context)?;
        records.append(&mut parsed);
    }

    if records.is_empty() {
        Err(FormatReadError::Parse {
            message: "No GeoJSON features found".to_string(),
            position: None,
            context: Some(context.to_string()),
        })
    } else {
        Ok(records)
    }
}

fn combine_errors(
    collection_err: &str,
    sequence_err: &FormatReadError,
    context: String,
) -> FormatReadError {
    let message = format!(
        "Failed to parse GeoJSON as FeatureCollection ({collection_err}); \
         also failed to parse as GeoJSON sequence: {sequence_err}"
    );
    FormatReadError::Parse {
        message,
        position: None,
        context: Some(context),
    }
}

/// Maps a JSON property onto a scalar attribute.
///
/// Nested arrays and objects are kept as their JSON text.
pub(crate) fn json_to_attribute(value: JsonValue) -> AttributeValue {
    match value {
        JsonValue::Null => AttributeValue::Null,
        JsonValue::Bool(b) => AttributeValue::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Int(i),
            None => n
                .as_f64()
                .map_or(AttributeValue::Null, AttributeValue::Float),
        },
        JsonValue::String(s) => AttributeValue::Text(s),
        other @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
            AttributeValue::Text(other.to_string())
        },
    }
}
