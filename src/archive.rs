use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::GeoparcelError;

/// File name suffixes that never belong in a delivery archive: stale
/// archives, lock files, and SQLite write-ahead sidecars.
const EXCLUDED_SUFFIXES: [&str; 5] = [".zip", ".lock", "-wal", "-shm", "-journal"];

pub fn is_excluded(file_name: &str) -> bool {
    let lowered = file_name.to_lowercase();
    EXCLUDED_SUFFIXES
        .iter()
        .any(|suffix| lowered.ends_with(suffix))
}

/// Compresses `source_dir` into a zip at `destination`, storing entry paths
/// relative to the archive root and skipping excluded files.
pub fn zip_directory(source_dir: &Path, destination: &Path) -> Result<(), GeoparcelError> {
    let file = fs::File::create(destination).map_err(|err| {
        GeoparcelError::Filesystem(format!("create zip {}: {err}", destination.display()))
    })?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in walk_files(source_dir)? {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if is_excluded(file_name) {
            continue;
        }

        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
        let entry_name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer
            .start_file(&entry_name, options)
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
        let mut input = fs::File::open(&path)
            .map_err(|err| GeoparcelError::Filesystem(format!("open {}: {err}", path.display())))?;
        io::copy(&mut input, &mut writer)
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
    }

    writer
        .finish()
        .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
    Ok(())
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), GeoparcelError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        GeoparcelError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GeoparcelError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(GeoparcelError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), GeoparcelError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        GeoparcelError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| GeoparcelError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| GeoparcelError::Archive(err.to_string()))?;
    }
    Ok(())
}

/// Lists archive entry names, in archive order.
pub fn list_entries(zip_path: &Path) -> Result<Vec<String>, GeoparcelError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        GeoparcelError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let archive =
        ZipArchive::new(file).map_err(|err| GeoparcelError::Archive(err.to_string()))?;
    Ok(archive.file_names().map(str::to_string).collect())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, GeoparcelError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| GeoparcelError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
