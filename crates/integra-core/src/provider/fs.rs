use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{ChildEntry, LiveTree, ResolveError};
use crate::digest::{DigestCompositor, Fingerprint};

/// File-system subtree rooted at an absolute path.
#[derive(Debug, Clone)]
pub struct FileSource {
    base: PathBuf,
    compositor: DigestCompositor,
}

#[derive(Debug, Clone)]
pub struct FsNode {
    path: PathBuf,
    is_dir: bool,
}

impl FileSource {
    pub fn new(base: impl Into<PathBuf>, compositor: DigestCompositor) -> Self {
        Self {
            base: base.into(),
            compositor,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn stat(path: PathBuf) -> Result<FsNode, ResolveError> {
        let metadata = fs::metadata(&path)?;
        Ok(FsNode {
            is_dir: metadata.is_dir(),
            path,
        })
    }
}

impl LiveTree for FileSource {
    type Node = FsNode;

    fn open_root(&self) -> Result<FsNode, ResolveError> {
        Self::stat(self.base.clone())
    }

    fn open_child(&self, parent: &FsNode, name: &str, _container: bool) -> Result<FsNode, ResolveError> {
        Self::stat(parent.path.join(name))
    }

    fn is_container(&self, node: &FsNode) -> bool {
        node.is_dir
    }

    fn children(&self, node: &FsNode) -> io::Result<Vec<ChildEntry>> {
        if !node.is_dir {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&node.path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            if entry.file_type().is_symlink() || is_reparse_point(&entry) {
                debug!(path = %entry.path().display(), "skipping link");
                continue;
            }

            entries.push(ChildEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                container: entry.file_type().is_dir(),
            });
        }
        Ok(entries)
    }

    fn digest(&self, node: &FsNode) -> Option<io::Result<Fingerprint>> {
        if node.is_dir {
            return None;
        }
        Some(File::open(&node.path).and_then(|f| self.compositor.leaf_file_reader(f)))
    }

    fn root_location(&self) -> String {
        self.base.display().to_string()
    }

    fn child_location(&self, parent: &str, name: &str) -> String {
        Path::new(parent).join(name).display().to_string()
    }
}

#[cfg(windows)]
fn is_reparse_point(entry: &walkdir::DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    use windows_sys::Win32::Storage::FileSystem::FILE_ATTRIBUTE_REPARSE_POINT;

    entry
        .metadata()
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_reparse_point(_entry: &walkdir::DirEntry) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn children_are_sorted_and_typed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let source = FileSource::new(dir.path(), DigestCompositor::default());
        let root = source.open_root().unwrap();
        let names: Vec<_> = source
            .children(&root)
            .unwrap()
            .into_iter()
            .map(|c| (c.name, c.container))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a.txt".to_string(), false),
                ("b.txt".to_string(), false),
                ("sub".to_string(), true)
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

        let source = FileSource::new(dir.path(), DigestCompositor::default());
        let root = source.open_root().unwrap();
        let children = source.children(&root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "real.txt");
    }

    #[test]
    fn missing_root_is_not_found() {
        let dir = tempdir().unwrap();
        let source = FileSource::new(dir.path().join("gone"), DigestCompositor::default());
        assert_eq!(source.open_root().unwrap_err(), ResolveError::NotFound);
    }

    #[test]
    fn directories_have_no_digest() {
        let dir = tempdir().unwrap();
        let source = FileSource::new(dir.path(), DigestCompositor::default());
        let root = source.open_root().unwrap();
        assert!(source.digest(&root).is_none());
    }
}
