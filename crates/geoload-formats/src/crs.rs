//! Coordinate reference system detection from the ways sources declare it:
//! `.prj` WKT for shapefiles, `srsName` URIs for GML and legacy GeoJSON
//! `crs` members.

use crate::dataset::Crs;

/// Well-known CRS names that show up in `.prj` files without an authority.
const KNOWN_NAMES: &[(&str, i32)] = &[
    ("GCS_WGS_1984", 4326),
    ("WGS 84", 4326),
    ("WGS_1984_Web_Mercator_Auxiliary_Sphere", 3857),
    ("WGS 84 / Pseudo-Mercator", 3857),
    ("GCS_SIRGAS-Chile", 5360),
    ("GCS_SIRGAS_2000", 4674),
];

/// Resolves an EPSG code from a CRS URI or short form.
///
/// Accepts `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`,
/// `urn:ogc:def:crs:EPSG:6.6:4326`, `http://www.opengis.net/def/crs/EPSG/0/4326`,
/// `http://www.opengis.net/gml/srs/epsg.xml#4326` and the CRS84 aliases.
#[must_use]
pub fn epsg_from_srs_name(name: &str) -> Option<i32> {
    let trimmed = name.trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper.ends_with("CRS84") {
        return Some(4326);
    }
    if !upper.contains("EPSG") {
        return None;
    }
    let tail = trimmed.rsplit([':', '/', '#']).next()?;
    tail.trim().parse().ok()
}

/// Builds a [`Crs`] from a URI, keeping the raw text even when no code is found.
#[must_use]
pub fn crs_from_srs_name(name: &str) -> Crs {
    Crs {
        epsg: epsg_from_srs_name(name),
        definition: Some(name.to_string()),
    }
}

/// Resolves an EPSG code from ESRI/OGC WKT as found in `.prj` files.
///
/// The outermost `AUTHORITY["EPSG","..."]` is the last one in the text;
/// nested ones belong to the datum, spheroid or units.
#[must_use]
pub fn epsg_from_wkt(wkt: &str) -> Option<i32> {
    if let Some(code) = last_authority_code(wkt) {
        return Some(code);
    }
    let name = outer_name(wkt)?;
    KNOWN_NAMES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

/// Builds a [`Crs`] from WKT text.
#[must_use]
pub fn crs_from_wkt(wkt: &str) -> Crs {
    Crs {
        epsg: epsg_from_wkt(wkt),
        definition: Some(wkt.trim().to_string()),
    }
}

fn last_authority_code(wkt: &str) -> Option<i32> {
    let upper = wkt.to_ascii_uppercase();
    let start = upper.rfind("AUTHORITY[")?;
    let (_, rest) = wkt[start..].split_once(',')?;
    let end = rest.find(']')?;
    rest[..end]
        .trim()
        .trim_matches('"')
        .trim()
        .parse()
        .ok()
}

fn outer_name(wkt: &str) -> Option<&str> {
    let open = wkt.find('[')?;
    let rest = &wkt[open + 1..];
    let start = rest.find('"')? + 1;
    let len = rest[start..].find('"')?;
    Some(&rest[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srs_name_forms() {
        assert_eq!(epsg_from_srs_name("EPSG:4326"), Some(4326));
        assert_eq!(epsg_from_srs_name("urn:ogc:def:crs:EPSG::32719"), Some(32719));
        assert_eq!(epsg_from_srs_name("urn:ogc:def:crs:EPSG:6.6:3857"), Some(3857));
        assert_eq!(
            epsg_from_srs_name("http://www.opengis.net/def/crs/EPSG/0/5361"),
            Some(5361)
        );
        assert_eq!(
            epsg_from_srs_name("http://www.opengis.net/gml/srs/epsg.xml#4326"),
            Some(4326)
        );
        assert_eq!(epsg_from_srs_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(4326));
        assert_eq!(epsg_from_srs_name("local"), None);
    }

    #[test]
    fn wkt_outer_authority_wins() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 19S",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],UNIT["metre",1],AUTHORITY["EPSG","32719"]]"#;
        assert_eq!(epsg_from_wkt(wkt), Some(32719));
    }

    #[test]
    fn esri_wkt_without_authority_uses_name() {
        let wkt = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(epsg_from_wkt(wkt), Some(4326));
    }

    #[test]
    fn unknown_wkt_keeps_definition() {
        let crs = crs_from_wkt(r#"PROJCS["Custom",GEOGCS["X"]]"#);
        assert_eq!(crs.epsg, None);
        assert!(crs.definition.unwrap().starts_with("PROJCS"));
    }
}
