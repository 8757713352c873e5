//! Extension-based dispatch from a path to the matching format reader.

use std::io;
use std::path::Path;

use log::info;

use crate::archive::{KMZ_PAYLOAD_PRIORITY, ZIP_PAYLOAD_PRIORITY, read_archive};
use crate::dataset::Dataset;
use crate::drivers::{Format, driver_for_path};
use crate::error::{FormatReadError, FormatResult};
use crate::geojson::read_geojson;
use crate::gml::read_gml;
use crate::gpkg::read_gpkg;
use crate::kml::read_kml;
use crate::shapefile::read_shapefile;

/// Reads any supported vector file or archive into a [`Dataset`].
///
/// # Errors
///
/// Returns [`FormatReadError::UnsupportedFormat`] for unknown extensions,
/// [`FormatReadError::NoPayload`] for archives without a readable member and
/// I/O or parse errors from the underlying reader.
pub fn read_vector(path: &Path) -> FormatResult<Dataset> {
    let driver = driver_for_path(path).ok_or_else(|| FormatReadError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    if !path.is_file() {
        return Err(FormatReadError::io(
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
            path.display().to_string(),
        ));
    }

    info!("Reading {} with the {} driver", path.display(), driver.short_name);
    let dataset = read_format(driver.format, path)?;
    info!(
        "Read layer '{}' ({} features, {} columns)",
        dataset.layer,
        dataset.len(),
        dataset.columns.len()
    );
    Ok(dataset)
}

fn read_format(format: Format, path: &Path) -> FormatResult<Dataset> {
    match format {
        Format::GeoJson => read_geojson(path),
        Format::Shapefile => read_shapefile(path),
        Format::GeoPackage => read_gpkg(path),
        Format::Kml => read_kml(path),
        Format::Gml => read_gml(path),
        Format::Kmz => read_archive(path, KMZ_PAYLOAD_PRIORITY, read_kml),
        Format::Zip => read_archive(path, ZIP_PAYLOAD_PRIORITY, read_payload),
    }
}

/// Reads a file found inside an archive. Nested archives are not opened.
fn read_payload(path: &Path) -> FormatResult<Dataset> {
    match driver_for_path(path) {
        Some(driver) if !driver.is_archive() => read_format(driver.format, path),
        _ => Err(FormatReadError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = read_vector(Path::new("notas.csv")).unwrap_err();
        assert!(matches!(err, FormatReadError::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_vector(Path::new("/nonexistent/capa.geojson")).unwrap_err();
        assert!(matches!(err, FormatReadError::Io { .. }));
    }
}
