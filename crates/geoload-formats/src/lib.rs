//! `geoload-formats` turns vector files into in-memory [`Dataset`]s.
//!
//! This crate includes:
//! - **Driver Registry**: the formats and extensions [`read_vector`] dispatches on.
//! - **Readers**: GeoJSON, ESRI Shapefile, GeoPackage, KML and GML.
//! - **Archives**: `.kmz` and `.zip` bundles, extracted into scoped temporary directories.
//! - **CRS detection** from `.prj` WKT, `srsName` URIs and GeoPackage SRS tables.

pub mod archive;
pub mod crs;
pub mod dataset;
pub mod drivers;
pub mod error;
pub mod geojson;
pub mod gml;
pub mod gpkg;
pub mod kml;
pub mod reader;
pub mod shapefile;

pub use dataset::{AttributeValue, Crs, Dataset, GEOMETRY_COLUMN, Record};
pub use drivers::{Driver, DriverKind, Format};
pub use error::{FormatReadError, FormatResult, SourcePosition};
pub use reader::read_vector;
