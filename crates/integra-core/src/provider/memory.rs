//! In-process registry used on hosts without a native one, and by tests.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use super::registry::{RegistryHive, RegistryPath, RegistryValue, RootKey};
use super::ResolveError;

#[derive(Debug, Default, Clone)]
struct KeyData {
    sub_keys: BTreeMap<String, KeyData>,
    values: BTreeMap<String, RegistryValue>,
    denied: bool,
    unreadable: BTreeSet<String>,
}

/// A registry held in memory. Clones share the same state, so a test can
/// keep a handle and mutate the hive while a monitor is reading it.
#[derive(Debug, Clone, Default)]
pub struct MemoryHive {
    roots: Arc<RwLock<BTreeMap<RootKey, KeyData>>>,
}

#[derive(Debug, Clone)]
pub struct MemoryKey {
    root: RootKey,
    segments: Vec<String>,
}

fn parse(path: &str) -> io::Result<RegistryPath> {
    path.parse()
        .map_err(|e: crate::Error| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

impl MemoryHive {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_key<T>(
        &self,
        key: &MemoryKey,
        f: impl FnOnce(&KeyData) -> T,
    ) -> Result<T, ResolveError> {
        let roots = self.roots.read();
        let mut node = roots.get(&key.root).ok_or(ResolveError::NotFound)?;
        for segment in &key.segments {
            node = node.sub_keys.get(segment).ok_or(ResolveError::NotFound)?;
        }
        Ok(f(node))
    }

    fn with_key_mut<T>(&self, path: &str, create: bool, f: impl FnOnce(&mut KeyData) -> T) -> io::Result<T> {
        let path = parse(path)?;
        let mut roots = self.roots.write();
        let mut node = roots.entry(path.root).or_default();
        for segment in path.segments() {
            node = if create {
                node.sub_keys.entry(segment.to_string()).or_default()
            } else {
                node.sub_keys
                    .get_mut(segment)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?
            };
        }
        Ok(f(node))
    }

    /// Creates the key and any missing ancestors.
    pub fn create_key(&self, path: &str) -> io::Result<()> {
        self.with_key_mut(path, true, |_| ())
    }

    /// Sets a value, creating the key if needed.
    pub fn set_value(&self, path: &str, name: &str, type_code: u32, data: &[u8]) -> io::Result<()> {
        self.with_key_mut(path, true, |key| {
            key.values.insert(
                name.to_string(),
                RegistryValue {
                    type_code,
                    data: data.to_vec(),
                },
            );
        })
    }

    /// Deletes a key and its subtree.
    pub fn delete_key(&self, path: &str) -> io::Result<()> {
        let parsed = parse(path)?;
        let mut segments: Vec<&str> = parsed.segments().collect();
        let leaf = segments
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cannot delete a root key"))?;
        let parent = format!("{}\\{}", parsed.root.name(), segments.join("\\"));
        self.with_key_mut(&parent, false, |key| key.sub_keys.remove(leaf))?
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    pub fn delete_value(&self, path: &str, name: &str) -> io::Result<()> {
        self.with_key_mut(path, false, |key| key.values.remove(name))?
            .map(|_| ())
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    /// Makes a key refuse to open, as a key with a restrictive ACL would.
    pub fn deny(&self, path: &str) -> io::Result<()> {
        self.with_key_mut(path, false, |key| key.denied = true)
    }

    /// Makes a value still listed by its key fail every read.
    pub fn deny_value(&self, path: &str, name: &str) -> io::Result<()> {
        self.with_key_mut(path, false, |key| key.unreadable.insert(name.to_string()))
            .map(|_| ())
    }
}

impl RegistryHive for MemoryHive {
    type Key = MemoryKey;

    fn open_key(&self, path: &RegistryPath) -> Result<MemoryKey, ResolveError> {
        let key = MemoryKey {
            root: path.root,
            segments: path.segments().map(str::to_string).collect(),
        };
        match self.with_key(&key, |data| data.denied)? {
            true => Err(ResolveError::AccessDenied),
            false => Ok(key),
        }
    }

    fn open_sub_key(&self, parent: &MemoryKey, name: &str) -> Result<MemoryKey, ResolveError> {
        let mut key = parent.clone();
        key.segments.push(name.to_string());
        match self.with_key(&key, |data| data.denied)? {
            true => Err(ResolveError::AccessDenied),
            false => Ok(key),
        }
    }

    fn sub_key_names(&self, key: &MemoryKey) -> io::Result<Vec<String>> {
        self.with_key(key, |data| data.sub_keys.keys().cloned().collect())
            .map_err(resolve_to_io)
    }

    fn value_names(&self, key: &MemoryKey) -> io::Result<Vec<String>> {
        self.with_key(key, |data| data.values.keys().cloned().collect())
            .map_err(resolve_to_io)
    }

    fn value_exists(&self, key: &MemoryKey, name: &str) -> Result<bool, ResolveError> {
        self.with_key(key, |data| data.values.contains_key(name))
    }

    fn read_value(&self, key: &MemoryKey, name: &str) -> io::Result<RegistryValue> {
        let value = self
            .with_key(key, |data| {
                if data.unreadable.contains(name) {
                    Err(io::Error::from(io::ErrorKind::PermissionDenied))
                } else {
                    Ok(data.values.get(name).cloned())
                }
            })
            .map_err(resolve_to_io)??;
        value.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

fn resolve_to_io(err: ResolveError) -> io::Error {
    match err {
        ResolveError::NotFound => io::Error::from(io::ErrorKind::NotFound),
        ResolveError::AccessDenied => io::Error::from(io::ErrorKind::PermissionDenied),
        ResolveError::Other(msg) => io::Error::new(io::ErrorKind::Other, msg),
    }
}
