//! The ordered in-memory list of monitored objects.

use std::collections::HashSet;

use tracing::info;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::provider::RegistryHive;
use crate::tree::{MonitoredObject, ObjectKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub name: String,
    pub kind: ObjectKind,
    pub base_path: String,
}

/// Objects in insertion order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectRegistry {
    objects: Vec<MonitoredObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_objects(objects: Vec<MonitoredObject>) -> Result<Self> {
        let mut seen = HashSet::new();
        for object in &objects {
            if !seen.insert(object.name.as_str()) {
                return Err(Error::Schema(format!(
                    "object '{}' appears more than once",
                    object.name
                )));
            }
        }
        Ok(Self { objects })
    }

    /// Snapshots the object and appends it. Returns the snapshot warnings.
    pub fn add<H: RegistryHive>(
        &mut self,
        host: &Host<H>,
        name: &str,
        kind: ObjectKind,
        base_path: &str,
    ) -> Result<Vec<String>> {
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        let outcome = host.snapshot(name, kind, base_path)?;
        info!(object = %name, "object added");
        self.objects.push(outcome.object);
        Ok(outcome.warnings)
    }

    pub fn remove(&mut self, name: &str) -> Result<MonitoredObject> {
        let index = self
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        info!(object = %name, "object removed");
        Ok(self.objects.remove(index))
    }

    /// Re-snapshots an object from its stored kind, path and algorithm. The
    /// object keeps its position; on failure the old tree stays in place.
    pub fn update<H: RegistryHive>(&mut self, host: &Host<H>, name: &str) -> Result<Vec<String>> {
        let index = self
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let current = &self.objects[index];
        let outcome = host.snapshot_with(
            &current.name,
            current.kind,
            &current.base_path,
            current.algorithm,
        )?;
        info!(object = %name, "object updated");
        self.objects[index] = outcome.object;
        Ok(outcome.warnings)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|o| o.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&MonitoredObject> {
        self.find(name).map(|i| &self.objects[i])
    }

    pub fn list(&self) -> Vec<ObjectSummary> {
        self.objects
            .iter()
            .map(|o| ObjectSummary {
                name: o.name.clone(),
                kind: o.kind,
                base_path: o.base_path.clone(),
            })
            .collect()
    }

    pub fn objects(&self) -> &[MonitoredObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryHive;
    use std::fs;
    use tempfile::tempdir;

    fn host() -> Host<MemoryHive> {
        Host::new(MemoryHive::new())
    }

    #[test]
    fn add_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().display().to_string();
        let host = host();
        let mut registry = ObjectRegistry::new();
        registry.add(&host, "one", ObjectKind::FileTree, &path).unwrap();
        let err = registry
            .add(&host, "one", ObjectKind::FileTree, &path)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(ref n) if n == "one"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_snapshot_leaves_registry_unchanged() {
        let dir = tempdir().unwrap();
        let host = host();
        let mut registry = ObjectRegistry::new();
        let err = registry
            .add(
                &host,
                "gone",
                ObjectKind::FileTree,
                &dir.path().join("missing").display().to_string(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotFailed { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn update_keeps_position_and_replaces_tree() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        let host = host();
        let mut registry = ObjectRegistry::new();
        registry.add(&host, "a", ObjectKind::FileTree, &a.display().to_string()).unwrap();
        registry.add(&host, "b", ObjectKind::FileTree, &b.display().to_string()).unwrap();

        fs::write(a.join("new.txt"), b"n").unwrap();
        registry.update(&host, "a").unwrap();

        assert_eq!(registry.find("a"), Some(0));
        assert!(registry.get("a").unwrap().root.child("new.txt").is_some());
    }

    #[test]
    fn update_failure_keeps_old_tree() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        fs::create_dir(&a).unwrap();
        let host = host();
        let mut registry = ObjectRegistry::new();
        registry.add(&host, "a", ObjectKind::FileTree, &a.display().to_string()).unwrap();
        let before = registry.clone();

        fs::remove_dir(&a).unwrap();
        assert!(registry.update(&host, "a").is_err());
        assert_eq!(registry, before);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let mut registry = ObjectRegistry::new();
        assert!(matches!(registry.remove("x"), Err(Error::NotFound(_))));
        assert!(matches!(registry.update(&host(), "x"), Err(Error::NotFound(_))));
        assert_eq!(registry.find("x"), None);
    }

    #[test]
    fn list_reports_insertion_order() {
        let hive = MemoryHive::new();
        hive.create_key("HKEY_USERS\\S-1\\Z").unwrap();
        hive.create_key("HKEY_USERS\\S-1\\A").unwrap();
        let host = Host::new(hive);
        let mut registry = ObjectRegistry::new();
        registry.add(&host, "z", ObjectKind::RegistryTree, "HKU\\S-1\\Z").unwrap();
        registry.add(&host, "a", ObjectKind::RegistryTree, "HKU\\S-1\\A").unwrap();

        let names: Vec<_> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(registry.list()[0].base_path, "HKEY_USERS\\S-1\\Z");
    }
}
