//! Zip and KMZ containers.
//!
//! Archives are extracted into a [`TempDir`] that lives only for the duration
//! of the read; the directory is removed when the guard drops, on success and
//! on every error path.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::TempDir;
use zip::ZipArchive;

use crate::dataset::Dataset;
use crate::error::{FormatReadError, FormatResult};

/// Payload search order inside a `.zip`: shapefile, then GeoJSON, then
/// GeoPackage.
pub const ZIP_PAYLOAD_PRIORITY: &[&[&str]] = &[&["shp"], &["geojson", "json"], &["gpkg"]];

/// Payload search order inside a `.kmz`.
pub const KMZ_PAYLOAD_PRIORITY: &[&[&str]] = &[&["kml"]];

/// Extracts `archive` into a fresh temporary directory.
pub fn extract(archive: &Path) -> FormatResult<TempDir> {
    let context = archive.display().to_string();
    let file = File::open(archive).map_err(|e| FormatReadError::io(e, context.clone()))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| FormatReadError::from(e).with_additional_context(context.clone()))?;

    let dir = tempfile::Builder::new()
        .prefix("geoload-")
        .tempdir()
        .map_err(|e| FormatReadError::io(e, "creating extraction directory"))?;
    zip.extract(dir.path())
        .map_err(|e| FormatReadError::from(e).with_additional_context(context.clone()))?;

    debug!(
        "Extracted {} entries from {context} into {}",
        zip.len(),
        dir.path().display()
    );
    Ok(dir)
}

/// Finds the payload file under `root`.
///
/// Each group of `priority` is tried in turn; within a group the first file in
/// sorted path order wins. macOS resource forks are ignored.
pub fn locate_payload(root: &Path, priority: &[&[&str]]) -> FormatResult<Option<PathBuf>> {
    let files = list_files(root)?;
    Ok(priority.iter().find_map(|extensions| {
        files
            .iter()
            .find(|file| has_extension(file, extensions))
            .cloned()
    }))
}

/// Extracts `archive`, locates its payload and reads it with `read`.
pub fn read_archive<F>(archive: &Path, priority: &[&[&str]], read: F) -> FormatResult<Dataset>
where
    F: FnOnce(&Path) -> FormatResult<Dataset>,
{
    let dir = extract(archive)?;
    let payload = locate_payload(dir.path(), priority)?.ok_or_else(|| FormatReadError::NoPayload {
        archive: archive.to_path_buf(),
        expected: describe(priority),
    })?;
    debug!("Reading archive payload {}", payload.display());

    let archive_context = archive.display().to_string();
    read(&payload).map_err(|e| e.with_additional_context(archive_context))
}

fn describe(priority: &[&[&str]]) -> String {
    priority
        .iter()
        .flat_map(|group| group.iter())
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn is_resource_fork(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "__MACOSX")
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("._"))
}

/// All regular files below `root`, sorted by path.
fn list_files(root: &Path) -> FormatResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|e| FormatReadError::io(e, dir.display().to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|e| FormatReadError::io(e, dir.display().to_string()))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if !is_resource_fork(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
