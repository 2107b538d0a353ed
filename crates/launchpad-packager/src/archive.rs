//! Zip archives for the function platform.
//!
//! The dependency layer and the application code ship as two archives so
//! code-only changes upload a small object.

use bytes::Bytes;
use launchpad_core::{Error, Result};
use launchpad_executor::DEPENDENCY_DIR;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Directory the platform's layer convention expects dependencies under.
pub const LAYER_PREFIX: &str = "nodejs";

/// A finished archive, in memory.
#[derive(Debug, Clone)]
pub struct Archive {
    pub bytes: Bytes,
    /// Files, directories and links written.
    pub entries: usize,
}

/// Zip `<project_dir>/node_modules` as `nodejs/node_modules/...`.
pub async fn layer_archive(project_dir: &Path) -> Result<Archive> {
    let deps = project_dir.join(DEPENDENCY_DIR);
    if !deps.is_dir() {
        return Err(Error::MissingArtifact(format!(
            "dependency directory {} not found",
            deps.display()
        )));
    }
    let prefix = format!("{}/{}", LAYER_PREFIX, DEPENDENCY_DIR);
    spawn_blocking(move || zip_tree(&deps, &prefix, &[]))
        .await
        .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))?
        .map_err(Error::from)
}

/// Zip everything in `root` except its top-level dependency directory.
pub async fn code_archive(root: &Path) -> Result<Archive> {
    if !root.is_dir() {
        return Err(Error::MissingArtifact(format!(
            "packaging root {} not found",
            root.display()
        )));
    }
    let root = root.to_owned();
    spawn_blocking(move || zip_tree(&root, "", &[DEPENDENCY_DIR]))
        .await
        .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))?
        .map_err(Error::from)
}

fn zip_tree(src: &Path, prefix: &str, exclude_top: &[&str]) -> std::io::Result<Archive> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    if !prefix.is_empty() {
        zip.add_directory(format!("{}/", prefix), base).map_err(zip_err)?;
        entries += 1;
    }

    for path in walkdir(src, exclude_top)? {
        let relative = path
            .strip_prefix(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let name = entry_name(prefix, relative);
        let meta = std::fs::symlink_metadata(&path)?;
        let options = base.unix_permissions(mode(&meta));

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&path)?;
            zip.add_symlink(name, target.to_string_lossy(), options)
                .map_err(zip_err)?;
        } else if meta.is_dir() {
            zip.add_directory(format!("{}/", name), options)
                .map_err(zip_err)?;
        } else {
            zip.start_file(name, options).map_err(zip_err)?;
            zip.write_all(&std::fs::read(&path)?)?;
        }
        entries += 1;
    }

    let bytes = zip.finish().map_err(zip_err)?.into_inner();
    debug!(src = %src.display(), entries, size = bytes.len(), "created zip archive");

    Ok(Archive {
        bytes: Bytes::from(bytes),
        entries,
    })
}

/// Every path under `path` in a stable order, without following symlinks.
fn walkdir(path: &Path, exclude: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if exclude.iter().any(|name| entry.file_name() == *name) {
            continue;
        }
        let path = entry.path();
        let is_dir = entry.file_type()?.is_dir();
        paths.push(path.clone());

        if is_dir {
            paths.extend(walkdir(&path, &[])?);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Forward-slash entry name under `prefix`.
fn entry_name(prefix: &str, relative: &Path) -> String {
    let mut name = prefix.to_string();
    for component in relative.components() {
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

#[cfg(unix)]
fn mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

fn zip_err(e: zip::result::ZipError) -> std::io::Error {
    std::io::Error::other(e)
}
