//! Registry of the vector formats `read_vector` understands.
//!
//! Every driver claims a set of file extensions. Archive drivers wrap one of
//! the vector drivers and are resolved to their payload at read time.
//!
//! # Examples
//!
//! ```
//! use std::path::Path;
//! use geoload_formats::drivers::{Format, driver_for_path, find_driver};
//!
//! let shp = find_driver("ESRI Shapefile").expect("shapefile driver");
//! assert_eq!(shp.format, Format::Shapefile);
//!
//! let kmz = driver_for_path(Path::new("limites.KMZ")).expect("kmz driver");
//! assert!(kmz.is_archive());
//! ```

use std::path::Path;

/// Formats the reader can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    GeoJson,
    Shapefile,
    GeoPackage,
    Kml,
    Gml,
    /// Zipped KML.
    Kmz,
    /// Zip bundle holding a shapefile, GeoJSON or GeoPackage.
    Zip,
}

/// Whether a driver reads features directly or unwraps a container first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Vector,
    Archive,
}

impl DriverKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DriverKind::Vector => "Vector",
            DriverKind::Archive => "Archive",
        }
    }
}

/// A vector format driver definition.
#[derive(Debug, Clone)]
pub struct Driver {
    /// Short name used in the CLI and logs (e.g. `"GPKG"`).
    pub short_name: &'static str,
    /// Long descriptive name for display purposes.
    pub long_name: &'static str,
    /// Lower-case file extensions without the dot.
    pub extensions: &'static [&'static str],
    pub format: Format,
    pub kind: DriverKind,
}

impl Driver {
    #[must_use]
    pub const fn new(
        short_name: &'static str,
        long_name: &'static str,
        extensions: &'static [&'static str],
        format: Format,
        kind: DriverKind,
    ) -> Self {
        Self {
            short_name,
            long_name,
            extensions,
            format,
            kind,
        }
    }

    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.kind == DriverKind::Archive
    }

    /// Returns `true` if `extension` (without the dot) belongs to this driver.
    #[must_use]
    pub fn handles_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// Returns every registered driver.
#[must_use]
pub fn get_drivers() -> Vec<Driver> {
    use DriverKind::{Archive, Vector};

    vec![
        Driver::new("GeoJSON", "GeoJSON", &["geojson", "json"], Format::GeoJson, Vector),
        Driver::new(
            "ESRI Shapefile",
            "ESRI Shapefile / DBF",
            &["shp"],
            Format::Shapefile,
            Vector,
        ),
        Driver::new("GPKG", "GeoPackage vector", &["gpkg"], Format::GeoPackage, Vector),
        Driver::new("KML", "Keyhole Markup Language", &["kml"], Format::Kml, Vector),
        Driver::new("GML", "Geography Markup Language", &["gml"], Format::Gml, Vector),
        Driver::new("KMZ", "Zipped KML (.kmz)", &["kmz"], Format::Kmz, Archive),
        Driver::new(
            "ZIP",
            "Zip bundle (.shp, .geojson/.json or .gpkg inside)",
            &["zip"],
            Format::Zip,
            Archive,
        ),
    ]
}

/// Finds a driver by its short name (case-insensitive).
#[must_use]
pub fn find_driver(name: &str) -> Option<Driver> {
    get_drivers()
        .into_iter()
        .find(|d| d.short_name.eq_ignore_ascii_case(name))
}

/// Resolves the driver for a path from its extension.
#[must_use]
pub fn driver_for_path(path: &Path) -> Option<Driver> {
    let extension = path.extension()?.to_str()?;
    get_drivers()
        .into_iter()
        .find(|d| d.handles_extension(extension))
}

/// All supported extensions in registry order.
#[must_use]
pub fn supported_extensions() -> Vec<&'static str> {
    get_drivers()
        .iter()
        .flat_map(|d| d.extensions.iter().copied())
        .collect()
}
