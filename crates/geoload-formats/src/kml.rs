//! KML placemark parsing with `roxmltree`.

use std::path::Path;

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use log::debug;
use roxmltree::{Document, Node};

use crate::dataset::{AttributeValue, ColumnCollector, Crs, Dataset, layer_name};
use crate::error::{FormatReadError, FormatResult, SourcePosition};

const GEOMETRY_TAGS: &[&str] = &["Point", "LineString", "LinearRing", "Polygon", "MultiGeometry"];

/// Reads every `Placemark` of a KML document.
///
/// Columns are `name` and `description` followed by `ExtendedData` fields in
/// first-seen order. A file with no content is an empty layer, not an error.
pub fn read_kml(path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| FormatReadError::io(e, context.clone()))?;
    let text = String::from_utf8_lossy(&bytes);
    parse_kml(&text, path)
}

/// Parses KML text; `path` names the layer and appears in errors.
pub fn parse_kml(text: &str, path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let mut dataset = Dataset::new(layer_name(path), path).with_crs(Some(Crs::wgs84()));
    if text.trim().is_empty() {
        return Ok(dataset);
    }

    let doc = Document::parse(text).map_err(|e| FormatReadError::parse(e.to_string(), context.clone()))?;

    if let Some(name) = document_name(&doc) {
        dataset.layer = name;
    }

    let mut collector = ColumnCollector::new();
    collector.declare("name");
    collector.declare("description");

    let placemarks = doc.descendants().filter(|n| n.has_tag_name("Placemark"));
    for (idx, placemark) in placemarks.enumerate() {
        let geometry = placemark
            .children()
            .find(|n| n.is_element() && GEOMETRY_TAGS.contains(&n.tag_name().name()))
            .map(parse_geometry)
            .transpose()
            .map_err(|message| FormatReadError::Parse {
                message,
                position: Some(SourcePosition::record(idx as u64 + 1)),
                context: Some(context.clone()),
            })?;
        collector.push(placemark_properties(placemark), geometry);
    }
    collector.finish_into(&mut dataset);

    debug!("Read {} placemarks from {context}", dataset.len());
    Ok(dataset)
}

fn document_name(doc: &Document<'_>) -> Option<String> {
    let root = doc.root_element();
    let container = root
        .children()
        .find(|n| n.has_tag_name("Document") || n.has_tag_name("Folder"))?;
    child_text(container, "name").filter(|name| !name.is_empty())
}

fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .map(|n| n.text().unwrap_or_default().trim().to_string())
}

fn text_value(text: Option<String>) -> AttributeValue {
    match text {
        Some(text) if !text.is_empty() => AttributeValue::Text(text),
        _ => AttributeValue::Null,
    }
}

fn placemark_properties(placemark: Node<'_, '_>) -> Vec<(String, AttributeValue)> {
    let mut properties = vec![
        ("name".to_string(), text_value(child_text(placemark, "name"))),
        (
            "description".to_string(),
            text_value(child_text(placemark, "description")),
        ),
    ];

    let Some(extended) = placemark.children().find(|n| n.has_tag_name("ExtendedData")) else {
        return properties;
    };
    for field in extended.descendants() {
        let Some(key) = field.attribute("name") else {
            continue;
        };
        if field.has_tag_name("Data") {
            properties.push((key.to_string(), text_value(child_text(field, "value"))));
        } else if field.has_tag_name("SimpleData") {
            let text = field.text().map(|t| t.trim().to_string());
            properties.push((key.to_string(), text_value(text)));
        }
    }
    properties
}

fn parse_geometry(node: Node<'_, '_>) -> Result<Geometry<f64>, String> {
    match node.tag_name().name() {
        "Point" => {
            let coords = coordinates_of(node)?;
            coords
                .first()
                .map(|c| Point::from(*c).into())
                .ok_or_else(|| "Point without coordinates".to_string())
        },
        "LineString" | "LinearRing" => Ok(LineString::from(coordinates_of(node)?).into()),
        "Polygon" => parse_polygon(node).map(Geometry::from),
        "MultiGeometry" => {
            let parts = node
                .children()
                .filter(|n| n.is_element() && GEOMETRY_TAGS.contains(&n.tag_name().name()))
                .map(parse_geometry)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(collect_parts(parts))
        },
        other => Err(format!("unsupported KML geometry <{other}>")),
    }
}

fn parse_polygon(node: Node<'_, '_>) -> Result<Polygon<f64>, String> {
    let ring = |boundary: Node<'_, '_>| -> Result<LineString<f64>, String> {
        let ring = boundary
            .children()
            .find(|n| n.has_tag_name("LinearRing"))
            .ok_or_else(|| "polygon boundary without LinearRing".to_string())?;
        Ok(LineString::from(coordinates_of(ring)?))
    };

    let outer = node
        .children()
        .find(|n| n.has_tag_name("outerBoundaryIs"))
        .ok_or_else(|| "Polygon without outerBoundaryIs".to_string())?;
    let interiors = node
        .children()
        .filter(|n| n.has_tag_name("innerBoundaryIs"))
        .map(ring)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(ring(outer)?, interiors))
}

/// Builds the tightest multi-geometry for the parts of a `MultiGeometry`.
pub(crate) fn collect_parts(parts: Vec<Geometry<f64>>) -> Geometry<f64> {
    if !parts.is_empty() && parts.iter().all(|g| matches!(g, Geometry::Point(_))) {
        let points = parts
            .into_iter()
            .filter_map(|g| Point::try_from(g).ok())
            .collect::<Vec<_>>();
        return MultiPoint::new(points).into();
    }
    if !parts.is_empty() && parts.iter().all(|g| matches!(g, Geometry::LineString(_))) {
        let lines = parts
            .into_iter()
            .filter_map(|g| LineString::try_from(g).ok())
            .collect::<Vec<_>>();
        return MultiLineString::new(lines).into();
    }
    if !parts.is_empty() && parts.iter().all(|g| matches!(g, Geometry::Polygon(_))) {
        let polygons = parts
            .into_iter()
            .filter_map(|g| Polygon::try_from(g).ok())
            .collect::<Vec<_>>();
        return MultiPolygon::new(polygons).into();
    }
    Geometry::GeometryCollection(GeometryCollection::from(parts))
}

fn coordinates_of(node: Node<'_, '_>) -> Result<Vec<Coord<f64>>, String> {
    let text = node
        .children()
        .find(|n| n.has_tag_name("coordinates"))
        .and_then(|n| n.text())
        .unwrap_or_default();
    parse_coordinates(text)
}

/// Parses a KML `coordinates` body: whitespace separated `lon,lat[,alt]` tuples.
fn parse_coordinates(text: &str) -> Result<Vec<Coord<f64>>, String> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(str::trim);
            let x = parts.next().and_then(|v| v.parse::<f64>().ok());
            let y = parts.next().and_then(|v| v.parse::<f64>().ok());
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(format!("invalid KML coordinate tuple '{tuple}'")),
            }
        })
        .collect()
}
