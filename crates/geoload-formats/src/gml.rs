//! GML feature collections (GML 2, 3.1 and 3.2 / WFS responses).

use std::path::Path;

use geo_types::{Coord, Geometry, LineString, Point, Polygon};
use log::debug;
use roxmltree::{Document, Node};

use crate::crs::crs_from_srs_name;
use crate::dataset::{AttributeValue, ColumnCollector, Dataset, layer_name};
use crate::error::{FormatReadError, FormatResult, SourcePosition};
use crate::kml::collect_parts;

const GML_NAMESPACES: &[&str] = &["http://www.opengis.net/gml", "http://www.opengis.net/gml/3.2"];

const GEOMETRY_TAGS: &[&str] = &[
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiPoint",
    "MultiLineString",
    "MultiCurve",
    "MultiPolygon",
    "MultiSurface",
    "MultiGeometry",
];

/// Geographic CRSs whose URN forms use latitude/longitude axis order.
const LAT_LON_CODES: &[i32] = &[4326, 4258, 4269, 4674, 5360];

/// Reads the features of a GML document.
pub fn read_gml(path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| FormatReadError::io(e, context.clone()))?;
    let text = String::from_utf8_lossy(&bytes);
    parse_gml(&text, path)
}

/// Parses GML text. Simple child elements become attributes; the first
/// geometry property becomes the geometry.
pub fn parse_gml(text: &str, path: &Path) -> FormatResult<Dataset> {
    let context = path.display().to_string();
    let doc = Document::parse(text).map_err(|e| FormatReadError::parse(e.to_string(), context.clone()))?;

    let srs_name = doc
        .descendants()
        .find_map(|n| n.attribute("srsName"))
        .map(str::to_string);
    let crs = srs_name.as_deref().map(crs_from_srs_name);
    let swap_axes = srs_name.as_deref().is_some_and(uses_lat_lon_order);

    let features: Vec<Node<'_, '_>> = doc
        .descendants()
        .filter(|n| {
            n.has_tag_name("featureMember") || n.has_tag_name("member") || n.has_tag_name("featureMembers")
        })
        .flat_map(|member| member.children().filter(Node::is_element))
        .collect();

    let layer = features
        .first()
        .map_or_else(|| layer_name(path), |f| f.tag_name().name().to_string());
    let mut dataset = Dataset::new(layer, path).with_crs(crs);

    let mut collector = ColumnCollector::new();
    for (idx, feature) in features.iter().enumerate() {
        let mut properties = Vec::new();
        let mut geometry = None;
        for property in feature.children().filter(Node::is_element) {
            if is_gml(property) {
                continue;
            }
            if let Some(geom_node) = property.descendants().find(|n| is_geometry(*n)) {
                if geometry.is_none() {
                    geometry = Some(parse_geometry(geom_node, swap_axes).map_err(|message| {
                        FormatReadError::Parse {
                            message,
                            position: Some(SourcePosition::record(idx as u64 + 1)),
                            context: Some(context.clone()),
                        }
                    })?);
                }
            } else if !property.children().any(|n| n.is_element()) {
                let value = infer_value(property.text().unwrap_or_default());
                properties.push((property.tag_name().name().to_string(), value));
            }
        }
        collector.push(properties, geometry);
    }
    collector.finish_into(&mut dataset);

    debug!("Read {} GML features from {context}", dataset.len());
    Ok(dataset)
}

fn is_gml(node: Node<'_, '_>) -> bool {
    node.tag_name()
        .namespace()
        .is_some_and(|ns| GML_NAMESPACES.contains(&ns))
}

fn is_geometry(node: Node<'_, '_>) -> bool {
    node.is_element() && is_gml(node) && GEOMETRY_TAGS.contains(&node.tag_name().name())
}

fn uses_lat_lon_order(srs_name: &str) -> bool {
    let is_uri = srs_name.starts_with("urn:") || srs_name.starts_with("http://www.opengis.net/def/");
    is_uri
        && crate::crs::epsg_from_srs_name(srs_name).is_some_and(|code| LAT_LON_CODES.contains(&code))
        && !srs_name.to_ascii_uppercase().ends_with("CRS84")
}

/// Attribute text to the narrowest scalar it parses as.
fn infer_value(text: &str) -> AttributeValue {
    let text = text.trim();
    if text.is_empty() {
        return AttributeValue::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return AttributeValue::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return AttributeValue::Float(f);
    }
    match text {
        "true" => AttributeValue::Bool(true),
        "false" => AttributeValue::Bool(false),
        _ => AttributeValue::Text(text.to_string()),
    }
}

fn parse_geometry(node: Node<'_, '_>, swap: bool) -> Result<Geometry<f64>, String> {
    match node.tag_name().name() {
        "Point" => coordinates_of(node, swap)?
            .first()
            .map(|c| Point::from(*c).into())
            .ok_or_else(|| "Point without coordinates".to_string()),
        "LineString" | "LinearRing" => Ok(LineString::from(coordinates_of(node, swap)?).into()),
        "Polygon" => parse_polygon(node, swap).map(Geometry::from),
        "MultiPoint" | "MultiLineString" | "MultiCurve" | "MultiPolygon" | "MultiSurface"
        | "MultiGeometry" => {
            let parts = node
                .children()
                .filter(|n| n.is_element() && n.tag_name().name().contains("Member"))
                .flat_map(|member| member.children().filter(|n| is_geometry(*n)))
                .map(|part| parse_geometry(part, swap))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(collect_parts(parts))
        },
        other => Err(format!("unsupported GML geometry <{other}>")),
    }
}

fn parse_polygon(node: Node<'_, '_>, swap: bool) -> Result<Polygon<f64>, String> {
    let ring = |boundary: Node<'_, '_>| -> Result<LineString<f64>, String> {
        let ring = boundary
            .children()
            .find(|n| n.has_tag_name("LinearRing"))
            .ok_or_else(|| "polygon boundary without LinearRing".to_string())?;
        Ok(LineString::from(coordinates_of(ring, swap)?))
    };

    let exterior = node
        .children()
        .find(|n| n.has_tag_name("exterior") || n.has_tag_name("outerBoundaryIs"))
        .ok_or_else(|| "Polygon without exterior ring".to_string())?;
    let interiors = node
        .children()
        .filter(|n| n.has_tag_name("interior") || n.has_tag_name("innerBoundaryIs"))
        .map(ring)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(ring(exterior)?, interiors))
}

/// Coordinates from `gml:coordinates`, `gml:posList` or a run of `gml:pos`.
fn coordinates_of(node: Node<'_, '_>, swap: bool) -> Result<Vec<Coord<f64>>, String> {
    let mut coords = if let Some(list) = node.children().find(|n| n.has_tag_name("posList")) {
        let dimension = srs_dimension(list);
        let values = parse_numbers(list.text().unwrap_or_default())?;
        if values.len() % dimension != 0 {
            return Err(format!(
                "posList has {} values, not a multiple of dimension {dimension}",
                values.len()
            ));
        }
        values
            .chunks(dimension)
            .map(|c| Coord { x: c[0], y: c[1] })
            .collect()
    } else if let Some(coordinates) = node.children().find(|n| n.has_tag_name("coordinates")) {
        parse_coordinates(coordinates)?
    } else {
        node.children()
            .filter(|n| n.has_tag_name("pos"))
            .map(|pos| {
                let values = parse_numbers(pos.text().unwrap_or_default())?;
                match values.as_slice() {
                    [x, y, ..] => Ok(Coord { x: *x, y: *y }),
                    _ => Err("pos needs at least two values".to_string()),
                }
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    if swap {
        for coord in &mut coords {
            std::mem::swap(&mut coord.x, &mut coord.y);
        }
    }
    Ok(coords)
}

fn srs_dimension(node: Node<'_, '_>) -> usize {
    node.ancestors()
        .find_map(|n| n.attribute("srsDimension"))
        .and_then(|d| d.parse::<usize>().ok())
        .filter(|d| *d >= 2)
        .unwrap_or(2)
}

fn parse_numbers(text: &str) -> Result<Vec<f64>, String> {
    text.split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|_| format!("invalid number '{v}'")))
        .collect()
}

/// GML 2 `coordinates`: tuples split by `ts` (default space), values by `cs`
/// (default comma).
fn parse_coordinates(node: Node<'_, '_>) -> Result<Vec<Coord<f64>>, String> {
    let cs = node.attribute("cs").unwrap_or(",");
    let decimal = node.attribute("decimal").unwrap_or(".");
    let text = node.text().unwrap_or_default();
    let tuples: Vec<&str> = match node.attribute("ts") {
        Some(ts) if !ts.trim().is_empty() => text.split(ts).collect(),
        _ => text.split_whitespace().collect(),
    };

    tuples
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|tuple| {
            let values = tuple
                .split(cs)
                .map(|v| v.trim().replace(decimal, ".").parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| format!("invalid GML coordinate tuple '{tuple}'"))?;
            match values.as_slice() {
                [x, y, ..] => Ok(Coord { x: *x, y: *y }),
                _ => Err(format!("invalid GML coordinate tuple '{tuple}'")),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GML3: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:ide="http://ide.cl">
  <wfs:member>
    <ide:comunas gml:id="c.1">
      <gml:boundedBy><gml:Envelope srsName="EPSG:32719"/></gml:boundedBy>
      <ide:nombre>Pirque</ide:nombre>
      <ide:cod_comuna>13202</ide:cod_comuna>
      <ide:superficie>445.3</ide:superficie>
      <ide:the_geom>
        <gml:Polygon srsName="EPSG:32719">
          <gml:exterior><gml:LinearRing>
            <gml:posList>0 0 10 0 10 10 0 10 0 0</gml:posList>
          </gml:LinearRing></gml:exterior>
        </gml:Polygon>
      </ide:the_geom>
    </ide:comunas>
  </wfs:member>
  <wfs:member>
    <ide:comunas gml:id="c.2">
      <ide:nombre></ide:nombre>
      <ide:the_geom>
        <gml:MultiSurface srsName="EPSG:32719">
          <gml:surfaceMember><gml:Polygon><gml:exterior><gml:LinearRing>
            <gml:posList>0 0 1 0 1 1 0 0</gml:posList>
          </gml:LinearRing></gml:exterior></gml:Polygon></gml:surfaceMember>
        </gml:MultiSurface>
      </ide:the_geom>
    </ide:comunas>
  </wfs:member>
</wfs:FeatureCollection>"#;

    #[test]
    fn parses_gml3_members() {
        let dataset = parse_gml(GML3, Path::new("comunas.gml")).unwrap();

        assert_eq!(dataset.layer, "comunas");
        assert_eq!(dataset.columns, vec!["nombre", "cod_comuna", "superficie"]);
        assert_eq!(dataset.crs.as_ref().and_then(|c| c.epsg), Some(32719));
        assert_eq!(dataset.records[0].values[1], AttributeValue::Int(13202));
        assert_eq!(dataset.records[0].values[2], AttributeValue::Float(445.3));
        assert_eq!(dataset.records[1].values[0], AttributeValue::Null);
        assert!(matches!(dataset.records[0].geometry, Some(Geometry::Polygon(_))));
        assert!(matches!(
            dataset.records[1].geometry,
            Some(Geometry::MultiPolygon(_))
        ));
    }

    #[test]
    fn parses_gml2_coordinates() {
        let gml = r#"<ogr:FeatureCollection xmlns:ogr="http://ogr.maptools.org/"
            xmlns:gml="http://www.opengis.net/gml">
          <gml:featureMember>
            <ogr:sitios>
              <ogr:geometryProperty>
                <gml:Point srsName="EPSG:4326"><gml:coordinates>-70.6,-33.4</gml:coordinates></gml:Point>
              </ogr:geometryProperty>
              <ogr:nombre>Santiago</ogr:nombre>
            </ogr:sitios>
          </gml:featureMember>
        </ogr:FeatureCollection>"#;

        let dataset = parse_gml(gml, Path::new("sitios.gml")).unwrap();
        assert_eq!(
            dataset.records[0].geometry,
            Some(Point::new(-70.6, -33.4).into())
        );
        assert_eq!(dataset.columns, vec!["nombre"]);
    }

    #[test]
    fn urn_geographic_crs_swaps_axes() {
        let gml = r#"<c xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:x="urn:x">
          <gml:featureMember><x:p>
            <x:g><gml:Point srsName="urn:ogc:def:crs:EPSG::4326"><gml:pos>-33.4 -70.6</gml:pos></gml:Point></x:g>
          </x:p></gml:featureMember>
        </c>"#;

        let dataset = parse_gml(gml, Path::new("p.gml")).unwrap();
        assert_eq!(
            dataset.records[0].geometry,
            Some(Point::new(-70.6, -33.4).into())
        );
    }

    #[test]
    fn collection_without_members_is_empty() {
        let gml = r#"<c xmlns:gml="http://www.opengis.net/gml"></c>"#;
        let dataset = parse_gml(gml, Path::new("vacio.gml")).unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.layer, "vacio");
    }

    #[test]
    fn pos_list_dimension_mismatch_fails() {
        let gml = r#"<c xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:x="urn:x">
          <gml:featureMember><x:p><x:g>
            <gml:LineString><gml:posList>0 0 1</gml:posList></gml:LineString>
          </x:g></x:p></gml:featureMember>
        </c>"#;
        assert!(parse_gml(gml, Path::new("bad.gml")).is_err());
    }
}
