//! Changed-items manifest
//!
//! After a run, the slugs whose content changed are written one per line to
//! `<dir>/<registry>.changed.txt`, which downstream scanners pick up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Path of the manifest for a registry
pub fn manifest_path(dir: &Path, registry_id: &str) -> PathBuf {
    dir.join(format!("{}.changed.txt", registry_id))
}

/// Writes the manifest, or removes a stale one when nothing changed
///
/// # Returns
///
/// The manifest path when one was written
pub fn write_manifest(
    dir: &Path,
    registry_id: &str,
    changed: &[String],
) -> io::Result<Option<PathBuf>> {
    let path = manifest_path(dir, registry_id);

    if changed.is_empty() {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale manifest {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        return Ok(None);
    }

    fs::create_dir_all(dir)?;

    let mut body = changed.join("\n");
    body.push('\n');

    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, &path)?;

    Ok(Some(path))
}

/// Reads a manifest back into slugs
pub fn read_manifest(path: &Path) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
