//! Persistence of the object list document.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::ObjectRegistry;
use crate::tree::MonitoredObject;

/// Documents above this size are refused without being read.
pub const MAX_DOCUMENT_BYTES: u64 = 100 * 1024 * 1024;

pub fn load_document(path: &Path) -> Result<ObjectRegistry> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::DocumentNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    if metadata.len() > MAX_DOCUMENT_BYTES {
        return Err(Error::DocumentTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
        });
    }

    let bytes = fs::read(path)?;
    let objects: Vec<MonitoredObject> = serde_json::from_slice(&bytes).map_err(Error::from_json)?;
    debug!(path = %path.display(), objects = objects.len(), "object list loaded");
    ObjectRegistry::from_objects(objects)
}

/// Writes the document next to its final location, then renames it into
/// place so a crash never leaves a truncated list behind.
pub fn save_document(path: &Path, registry: &ObjectRegistry) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(registry.objects()).map_err(Error::Parse)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    debug!(path = %path.display(), objects = registry.len(), "object list saved");
    Ok(())
}

/// An object list bound to its file.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    path: PathBuf,
}

impl ObjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ObjectRegistry> {
        load_document(&self.path)
    }

    /// Like [`load`](Self::load), but a missing document is an empty list.
    pub fn load_or_default(&self) -> Result<ObjectRegistry> {
        match load_document(&self.path) {
            Err(Error::DocumentNotFound(_)) => Ok(ObjectRegistry::new()),
            other => other,
        }
    }

    pub fn save(&self, registry: &ObjectRegistry) -> Result<()> {
        save_document(&self.path, registry)
    }
}
