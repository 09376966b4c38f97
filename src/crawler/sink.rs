//! Durable destinations for downloaded content

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Receives the content of every successful download
pub trait ContentSink: Send + Sync {
    /// Stores `content` for the item; an existing copy is overwritten
    fn write(&self, registry_id: &str, slug: &str, content: &[u8]) -> io::Result<()>;
}

/// Writes content to `<root>/<registry>/<safe-slug>.md`
#[derive(Debug, Clone)]
pub struct FsContentSink {
    root: PathBuf,
}

impl FsContentSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the content of `slug` is written to
    pub fn path_for(&self, registry_id: &str, slug: &str) -> PathBuf {
        self.root
            .join(registry_id)
            .join(format!("{}.md", safe_file_stem(slug)))
    }
}

impl ContentSink for FsContentSink {
    fn write(&self, registry_id: &str, slug: &str, content: &[u8]) -> io::Result<()> {
        let path = self.path_for(registry_id, slug);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        tracing::debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

/// Flattens a slug into a single file name
///
/// Path separators, `:`, `%` and control characters are percent-encoded,
/// so distinct slugs always map to distinct names.
pub fn safe_file_stem(slug: &str) -> String {
    let mut stem = String::with_capacity(slug.len());
    for c in slug.chars() {
        match c {
            '%' | '/' | '\\' | ':' => stem.push_str(&format!("%{:02X}", c as u32)),
            c if c.is_control() => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    stem.push_str(&format!("%{:02X}", byte));
                }
            }
            c => stem.push(c),
        }
    }
    stem
}
