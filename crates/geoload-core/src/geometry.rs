//! Geometry normalization: SRID resolution, reprojection and the declared
//! geometry type of the target column.

use std::collections::BTreeSet;

use geo::MapCoords;
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
};
use geoload_formats::Dataset;
use log::{debug, info};
use proj4rs::proj::Proj;

use crate::error::GeometryError;
use crate::types::GeometryFamily;

/// Declared type for columns holding more than one geometry type.
pub const GENERIC_GEOMETRY: &str = "GEOMETRY";

/// A dataset whose geometries are ready to load.
#[derive(Debug, Clone)]
pub struct NormalizedGeometry {
    /// `POINT`, `MULTIPOLYGON`, ... or `GEOMETRY` for mixed layers.
    pub geometry_type: String,
    pub srid: i32,
    /// Common family of all non-null geometries, `None` when mixed or empty.
    pub family: Option<GeometryFamily>,
    pub dataset: Dataset,
}

/// Normalizes the geometries of `dataset`.
///
/// The source SRID is the declared EPSG code (0 when unknown). With a target
/// SRID, data without a declared CRS is labelled with the target and data in
/// another CRS is reprojected.
///
/// # Errors
///
/// Returns [`GeometryError::UnsupportedCrs`] when a reprojection is needed
/// but either side has no usable definition, and
/// [`GeometryError::Reprojection`] when a coordinate fails to transform.
pub fn normalize(
    mut dataset: Dataset,
    target_srid: Option<i32>,
    promote_to_multi: bool,
) -> Result<NormalizedGeometry, GeometryError> {
    let declared = dataset.crs.clone();
    let source_srid = declared.as_ref().and_then(|crs| crs.epsg).unwrap_or(0);

    let srid = match (target_srid, &declared) {
        (None, _) => source_srid,
        (Some(target), None) => {
            debug!("No declared CRS for '{}', labelling as EPSG:{target}", dataset.layer);
            target
        },
        (Some(target), Some(_)) if source_srid == target => target,
        (Some(target), Some(crs)) => {
            if crs.epsg.is_none() {
                return Err(GeometryError::UnsupportedCrs {
                    source_crs: crs
                        .definition
                        .clone()
                        .unwrap_or_else(|| "an unknown CRS".to_string()),
                    target,
                });
            }
            info!(
                "Reprojecting '{}' from EPSG:{source_srid} to EPSG:{target}",
                dataset.layer
            );
            reproject_dataset(&mut dataset, source_srid, target)?;
            target
        },
    };

    for record in &mut dataset.records {
        if let Some(geometry) = record.geometry.take() {
            let geometry = canonical(geometry);
            record.geometry = Some(if promote_to_multi {
                promote(geometry)
            } else {
                geometry
            });
        }
    }

    let type_names: BTreeSet<&'static str> = dataset.geometries().map(type_name).collect();
    let geometry_type = match type_names.len() {
        1 => type_names
            .iter()
            .next()
            .map_or(GENERIC_GEOMETRY, |name| *name)
            .replace(' ', ""),
        _ => GENERIC_GEOMETRY.to_string(),
    };
    let family = common_family(dataset.geometries());

    debug!(
        "Layer '{}' normalized to {geometry_type} SRID {srid} (family {family:?})",
        dataset.layer
    );
    Ok(NormalizedGeometry {
        geometry_type,
        srid,
        family,
        dataset,
    })
}

/// PostGIS type name of a geometry.
#[must_use]
pub fn type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
    }
}

/// Dimensional family of one geometry. Collections have the family of
/// their members when they all agree.
#[must_use]
pub fn family_of(geometry: &Geometry<f64>) -> Option<GeometryFamily> {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Some(GeometryFamily::Point),
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            Some(GeometryFamily::Curve)
        },
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => Some(GeometryFamily::Surface),
        Geometry::GeometryCollection(collection) => common_family(collection.iter()),
    }
}

fn common_family<'a, I>(geometries: I) -> Option<GeometryFamily>
where
    I: IntoIterator<Item = &'a Geometry<f64>>,
{
    let mut family = None;
    for geometry in geometries {
        let current = family_of(geometry)?;
        match family {
            None => family = Some(current),
            Some(seen) if seen != current => return None,
            Some(_) => {},
        }
    }
    family
}

/// Replaces the geo-only shapes (`Line`, `Rect`, `Triangle`) with their
/// simple-feature equivalents.
fn canonical(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Line(line) => LineString::from(vec![line.start, line.end]).into(),
        Geometry::Rect(rect) => rect.to_polygon().into(),
        Geometry::Triangle(triangle) => triangle.to_polygon().into(),
        Geometry::GeometryCollection(collection) => {
            let parts: Vec<Geometry<f64>> = collection.into_iter().map(canonical).collect();
            Geometry::GeometryCollection(GeometryCollection::from(parts))
        },
        other => other,
    }
}

/// Converts single-part geometries to their multi-part type.
#[must_use]
pub fn promote(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::Point(point) => MultiPoint::new(vec![point]).into(),
        Geometry::LineString(line) => MultiLineString::new(vec![line]).into(),
        Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]).into(),
        other => other,
    }
}

fn projection(epsg: i32, target: i32) -> Result<Proj, GeometryError> {
    let unsupported = || GeometryError::UnsupportedCrs {
        source_crs: format!("EPSG:{epsg}"),
        target,
    };
    let code = u16::try_from(epsg).map_err(|_| unsupported())?;
    let definition = crs_definitions::from_code(code).ok_or_else(unsupported)?;
    Proj::from_proj_string(definition.proj4).map_err(|_| unsupported())
}

/// Reprojects every geometry of `dataset` in place and updates its CRS.
///
/// # Errors
///
/// See [`normalize`].
pub fn reproject_dataset(dataset: &mut Dataset, from: i32, to: i32) -> Result<(), GeometryError> {
    let source = projection(from, to)?;
    let target = projection(to, to)?;

    for record in &mut dataset.records {
        if let Some(geometry) = &record.geometry {
            let projected = reproject(geometry, &source, &target).map_err(|message| {
                GeometryError::Reprojection { from, to, message }
            })?;
            record.geometry = Some(projected);
        }
    }
    dataset.crs = Some(geoload_formats::Crs::epsg(to));
    Ok(())
}

fn reproject(geometry: &Geometry<f64>, source: &Proj, target: &Proj) -> Result<Geometry<f64>, String> {
    geometry.try_map_coords(|coord| transform_coord(coord, source, target))
}

fn transform_coord(coord: Coord<f64>, source: &Proj, target: &Proj) -> Result<Coord<f64>, String> {
    let mut point = if source.is_latlong() {
        (coord.x.to_radians(), coord.y.to_radians(), 0.0)
    } else {
        (coord.x, coord.y, 0.0)
    };
    proj4rs::transform::transform(source, target, &mut point).map_err(|e| e.to_string())?;

    let (x, y) = if target.is_latlong() {
        (point.0.to_degrees(), point.1.to_degrees())
    } else {
        (point.0, point.1)
    };
    if x.is_finite() && y.is_finite() {
        Ok(Coord { x, y })
    } else {
        Err(format!("coordinate ({}, {}) has no finite image", coord.x, coord.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{Point, Polygon, polygon};
    use geoload_formats::{Crs, Record};

    fn dataset(crs: Option<Crs>, geometries: Vec<Option<Geometry<f64>>>) -> Dataset {
        let mut dataset = Dataset::new("capa", "capa.geojson").with_crs(crs);
        dataset.records = geometries
            .into_iter()
            .map(|geometry| Record {
                values: Vec::new(),
                geometry,
            })
            .collect();
        dataset
    }

    fn square() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)]
    }

    #[test]
    fn test_single_type_is_declared() {
        let data = dataset(
            Some(Crs::wgs84()),
            vec![Some(Point::new(1.0, 2.0).into()), None, Some(Point::new(3.0, 4.0).into())],
        );
        let normalized = normalize(data, None, false).unwrap();
        assert_eq!(normalized.geometry_type, "POINT");
        assert_eq!(normalized.srid, 4326);
        assert_eq!(normalized.family, Some(GeometryFamily::Point));
    }

    #[test]
    fn test_polygon_and_multipolygon_degrade_to_geometry() {
        let data = dataset(
            None,
            vec![
                Some(square().into()),
                Some(MultiPolygon::new(vec![square()]).into()),
            ],
        );
        let normalized = normalize(data, None, false).unwrap();
        assert_eq!(normalized.geometry_type, "GEOMETRY");
        assert_eq!(normalized.srid, 0);
        assert_eq!(normalized.family, Some(GeometryFamily::Surface));
    }

    #[test]
    fn test_promotion_unifies_multi_types() {
        let data = dataset(
            None,
            vec![
                Some(square().into()),
                Some(MultiPolygon::new(vec![square()]).into()),
            ],
        );
        let normalized = normalize(data, None, true).unwrap();
        assert_eq!(normalized.geometry_type, "MULTIPOLYGON");
    }

    #[test]
    fn test_mixed_families_have_no_family() {
        let data = dataset(
            None,
            vec![Some(Point::new(0.0, 0.0).into()), Some(square().into())],
        );
        let normalized = normalize(data, None, false).unwrap();
        assert_eq!(normalized.geometry_type, "GEOMETRY");
        assert_eq!(normalized.family, None);
    }

    #[test]
    fn test_target_srid_labels_undeclared_data() {
        let data = dataset(None, vec![Some(Point::new(350_000.0, 6_300_000.0).into())]);
        let normalized = normalize(data, Some(32719), false).unwrap();
        assert_eq!(normalized.srid, 32719);
        assert_eq!(
            normalized.dataset.records[0].geometry,
            Some(Point::new(350_000.0, 6_300_000.0).into())
        );
    }

    #[test]
    fn test_reprojects_wgs84_to_web_mercator() {
        let data = dataset(Some(Crs::wgs84()), vec![Some(Point::new(10.0, 0.0).into())]);
        let normalized = normalize(data, Some(3857), false).unwrap();

        assert_eq!(normalized.srid, 3857);
        let Some(Geometry::Point(point)) = normalized.dataset.records[0].geometry else {
            panic!("expected point");
        };
        assert!((point.x() - 1_113_194.907_932_735_7).abs() < 1e-3, "{}", point.x());
        assert!(point.y().abs() < 1e-6);
        assert_eq!(normalized.dataset.crs.and_then(|c| c.epsg), Some(3857));
    }

    #[test]
    fn test_unresolvable_crs_with_target_fails() {
        let crs = Crs {
            epsg: None,
            definition: Some("PROJCS[\"Custom\"]".to_string()),
        };
        let data = dataset(Some(crs), vec![Some(Point::new(0.0, 0.0).into())]);
        let err = normalize(data, Some(3857), false).unwrap_err();
        assert!(matches!(err, GeometryError::UnsupportedCrs { target: 3857, .. }));
    }

    #[test]
    fn test_same_srid_is_untouched() {
        let data = dataset(Some(Crs::wgs84()), vec![Some(Point::new(10.0, 5.0).into())]);
        let normalized = normalize(data, Some(4326), false).unwrap();
        assert_eq!(
            normalized.dataset.records[0].geometry,
            Some(Point::new(10.0, 5.0).into())
        );
    }

    #[test]
    fn test_collection_family() {
        let collection = Geometry::GeometryCollection(GeometryCollection::from(vec![
            Geometry::from(square()),
            Geometry::from(MultiPolygon::new(vec![square()])),
        ]));
        assert_eq!(family_of(&collection), Some(GeometryFamily::Surface));
        assert_eq!(type_name(&collection), "GEOMETRYCOLLECTION");
    }
}
